//! # Pitch-Voice Mixer
//!
//! Runs several independent pitch-shift engines over the same input block
//! and blends their outputs into one wet signal:
//!
//! ```text
//!           ┌─► [voice 0: +12 st] ─► × w0 ─┐
//! input ────┤                              ├─(+)─► wet bus
//!           └─► [voice 1: +24 st] ─► × w1 ─┘
//! ```
//!
//! Every voice is processed every block, even when its weight is zero.
//! Skipping a voice starves its engine of input, and it glitches when it
//! comes back.

use nih_plug::{nih_debug_assert, nih_debug_assert_failure};

use crate::dsp::pitch_shift::PitchShiftEngine;
use crate::error::{self, PrepareError};

/// Frequency above which the engines stop trying to track pitch exactly.
pub const TONALITY_LIMIT_HZ: f32 = 8000.0;

/// Lifecycle of one voice's engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Uninitialized,
    Prepared,
    Processing,
}

/// One engine plus the buffer it renders into.
pub struct PitchVoice<E> {
    /// The voice's own shifter. Never shared with another voice.
    engine: E,
    /// One buffer per channel, twice the max block size long.
    output: Vec<Vec<f32>>,
    /// Where the engine is in its lifecycle. Only `Prepared` and
    /// `Processing` voices are run.
    state: VoiceState,
    /// Transpose last handed to the engine, `None` until the first call.
    semitones: Option<i32>,
}

impl<E: PitchShiftEngine + Default> PitchVoice<E> {
    fn new() -> Self {
        Self {
            engine: E::default(),
            output: Vec::new(),
            state: VoiceState::Uninitialized,
            semitones: None,
        }
    }
}

#[cfg(test)]
impl<E> PitchVoice<E> {
    pub fn state(&self) -> VoiceState {
        self.state
    }

    pub fn semitones(&self) -> Option<i32> {
        self.semitones
    }

    pub fn output(&self) -> &[Vec<f32>] {
        &self.output
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }
}

/// A bank of pitch-shift voices sharing one input.
pub struct PitchVoiceMixer<E> {
    voices: Vec<PitchVoice<E>>,
    latency: usize,
    max_block_size: usize,
}

impl<E: PitchShiftEngine + Default> Default for PitchVoiceMixer<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: PitchShiftEngine + Default> PitchVoiceMixer<E> {
    pub fn new() -> Self {
        Self {
            voices: Vec::new(),
            latency: 0,
            max_block_size: 0,
        }
    }

    /// Build `voice_count` fresh engines and size their output buffers.
    ///
    /// Returns the engines' output latency, which is what the host should
    /// be told. It stays fixed until the next `prepare()`.
    pub fn prepare(
        &mut self,
        voice_count: usize,
        num_channels: usize,
        sample_rate: f32,
        max_block_size: usize,
    ) -> Result<usize, PrepareError> {
        if max_block_size == 0 {
            return Err(PrepareError::EmptyBlockSize);
        }

        let mut voices = Vec::new();
        voices
            .try_reserve_exact(voice_count)
            .map_err(|source| PrepareError::Allocation {
                what: "pitch voices",
                source,
            })?;

        for _ in 0..voice_count {
            let mut voice = PitchVoice::new();
            voice.engine.configure_default(num_channels, sample_rate)?;
            voice.engine.reset();
            voice.output =
                error::zeroed_channels(num_channels, max_block_size * 2, "pitch voice output")?;
            voice.state = VoiceState::Prepared;
            voices.push(voice);
        }

        self.latency = voices
            .first()
            .map_or(0, |voice| voice.engine.output_latency_samples());
        self.voices = voices;
        self.max_block_size = max_block_size;

        Ok(self.latency)
    }
}

#[cfg(test)]
impl<E> PitchVoiceMixer<E> {
    pub fn latency_samples(&self) -> usize {
        self.latency
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    pub fn voice(&self, index: usize) -> Option<&PitchVoice<E>> {
        self.voices.get(index)
    }
}

impl<E: PitchShiftEngine> PitchVoiceMixer<E> {
    /// Retune one voice. Unknown voice indices are ignored, and so is a
    /// transpose equal to the one the engine already has.
    pub fn set_voice_transpose(&mut self, voice: usize, semitones: i32, tonality_limit_hz: f32) {
        let Some(voice) = self.voices.get_mut(voice) else {
            nih_debug_assert_failure!("no pitch voice at that index");
            return;
        };
        if voice.semitones == Some(semitones) {
            return;
        }
        voice.semitones = Some(semitones);
        voice
            .engine
            .set_transpose_semitones(semitones as f32, tonality_limit_hz);
    }

    /// Run every voice over the same `length` samples of `input`.
    pub fn process<I: AsRef<[f32]>>(&mut self, input: &[I], length: usize) {
        nih_debug_assert!(length <= self.max_block_size);
        let length = length.min(self.max_block_size);

        for voice in &mut self.voices {
            if voice.state == VoiceState::Uninitialized {
                nih_debug_assert_failure!("pitch voice processed before prepare()");
                continue;
            }
            voice
                .engine
                .process(input, length, &mut voice.output, length);
            voice.state = VoiceState::Processing;
        }
    }

    /// Overwrite `dest` with the weighted sum of the voice outputs.
    pub fn mix<O: AsMut<[f32]>>(&self, weights: &[f32], dest: &mut [O], length: usize) {
        let outputs = self.voices.iter().map(|voice| voice.output.as_slice());
        mix_voices(outputs, weights, dest, length);
    }

    /// Clear every engine's history. Voices that have been prepared stay
    /// prepared.
    pub fn reset(&mut self) {
        for voice in &mut self.voices {
            if voice.state == VoiceState::Uninitialized {
                continue;
            }
            voice.engine.reset();
            for channel in &mut voice.output {
                channel.fill(0.0);
            }
            voice.state = VoiceState::Prepared;
        }
    }
}

/// `dest[c][n] = Σ_v outputs[v][c][n] × weights[v]` for the first `length`
/// samples of each channel in `dest`.
///
/// Missing weights count as zero. Weights aren't normalized.
pub fn mix_voices<'a, V, O>(voice_outputs: V, weights: &[f32], dest: &mut [O], length: usize)
where
    V: IntoIterator<Item = &'a [Vec<f32>]>,
    O: AsMut<[f32]>,
{
    for channel in dest.iter_mut() {
        let channel = channel.as_mut();
        let len = length.min(channel.len());
        channel[..len].fill(0.0);
    }

    for (v, voice) in voice_outputs.into_iter().enumerate() {
        let weight = weights.get(v).copied().unwrap_or(0.0);
        for (channel, source) in dest.iter_mut().zip(voice) {
            let channel = channel.as_mut();
            let len = length.min(channel.len()).min(source.len());
            for (out, &sample) in channel[..len].iter_mut().zip(&source[..len]) {
                *out += sample * weight;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────
