//! # Block Orchestrator
//!
//! Drives the whole signal path once per host callback:
//!
//! ```text
//!                 ┌──────────────────────────────────────────── × (1 - mix) ──┐
//!                 │                                                           │
//! input ──► dry ──┼──► [pitch voices] ──► Σ w·voice ──┐                       │
//!                 │                                   ├──► wet bus ──► [reverb] ── × mix ──(+)──► output
//!                 └──► [delay line] ──► echo ─────────┘
//! ```
//!
//! Which stages run is fixed by [`Routing`], chosen per build.
//!
//! ## Per-Block Order
//!
//! 1. Clear output channels that have no input behind them.
//! 2. Bypassed? Leave the buffer alone and stop.
//! 3. Take one parameter snapshot.
//! 4. Run the routed stages into the wet bus.
//! 5. `output = (1 - mix) · dry + mix · wet`.
//! 6. Push fresh transpose values to the voices (heard from the next block).
//! 7. Advance the delay line once.
//!
//! Every buffer is allocated in [`ShimmerProcessor::prepare()`]; nothing in
//! [`ShimmerProcessor::process_block()`] allocates, locks or blocks.

use nih_plug::{nih_debug_assert, nih_debug_assert_failure, nih_log};

use crate::dsp::delay_line::DelayLine;
use crate::dsp::pitch_shift::{DelayPitchShifter, PitchShiftEngine};
use crate::dsp::reverb::{Freeverb, ReverbAlgorithm};
use crate::error::{self, PrepareError};
use crate::params::{ParameterSource, MAX_DELAY_MS, MAX_PITCH, MIN_PITCH, VOICE_COUNT};
use crate::reverb_send::ReverbSend;
use crate::voices::{PitchVoiceMixer, TONALITY_LIMIT_HZ};

/// Each write into the delay line is attenuated by this much, so repeated
/// passes through the ring can never build up.
pub const DELAY_WRITE_GAIN: f32 = 0.8;

/// Which stages the signal path runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Routing {
    pub delay: bool,
    pub pitch: bool,
    pub reverb: bool,
}

impl Routing {
    pub const DELAY: Self = Self {
        delay: true,
        pitch: false,
        reverb: false,
    };
    pub const SHIMMER: Self = Self {
        delay: false,
        pitch: true,
        reverb: false,
    };
    pub const SHIMMER_REVERB: Self = Self {
        delay: false,
        pitch: true,
        reverb: true,
    };
    pub const FULL: Self = Self {
        delay: true,
        pitch: true,
        reverb: true,
    };

    /// The routing selected by Cargo features.
    pub const fn for_build() -> Self {
        if cfg!(feature = "delay-only") {
            Self::DELAY
        } else if cfg!(feature = "shimmer-only") {
            Self::SHIMMER
        } else if cfg!(feature = "no-delay") {
            Self::SHIMMER_REVERB
        } else if cfg!(feature = "no-reverb") {
            Self {
                reverb: false,
                ..Self::FULL
            }
        } else {
            Self::FULL
        }
    }
}

/// The complete per-block signal path.
pub struct ShimmerProcessor<E = DelayPitchShifter, R = Freeverb> {
    /// Stages this build runs. Fixed at construction.
    routing: Routing,
    /// Host configuration from the last successful `prepare()`.
    sample_rate: f32,
    max_block_size: usize,
    num_channels: usize,

    delay: DelayLine,
    voices: PitchVoiceMixer<E>,
    reverb: ReverbSend<R>,

    /// Copy of the input, kept untouched for the final crossfade.
    dry: Vec<Vec<f32>>,
    /// Everything processed: voices, echo, then reverb on top.
    wet: Vec<Vec<f32>>,

    /// Delay write gain at the end of the previous block. The next write
    /// ramps from here.
    delay_gain: f32,
    /// Reported to the host, in samples.
    latency: u32,
    /// False until `prepare()` succeeds. Unprepared blocks come out silent.
    prepared: bool,
}

impl<E, R> ShimmerProcessor<E, R>
where
    E: PitchShiftEngine + Default,
    R: ReverbAlgorithm + Default,
{
    pub fn new(routing: Routing) -> Self {
        Self {
            routing,
            sample_rate: 0.0,
            max_block_size: 0,
            num_channels: 0,
            delay: DelayLine::new(),
            voices: PitchVoiceMixer::new(),
            reverb: ReverbSend::default(),
            dry: Vec::new(),
            wet: Vec::new(),
            delay_gain: 0.0,
            latency: 0,
            prepared: false,
        }
    }

    /// Size every buffer for a new host configuration.
    ///
    /// This is the only reconfiguration point. The host must not be running
    /// `process_block()` while it's called. Initial transpose values are
    /// read from `params`.
    pub fn prepare(
        &mut self,
        num_channels: usize,
        sample_rate: f32,
        max_block_size: usize,
        params: &impl ParameterSource,
    ) -> Result<(), PrepareError> {
        self.prepared = false;
        error::check_sample_rate(sample_rate)?;
        if max_block_size == 0 {
            return Err(PrepareError::EmptyBlockSize);
        }
        if num_channels == 0 {
            return Err(PrepareError::UnsupportedChannelCount(num_channels));
        }

        self.dry = error::zeroed_channels(num_channels, max_block_size, "dry bus")?;
        self.wet = error::zeroed_channels(num_channels, max_block_size, "wet bus")?;

        if self.routing.delay {
            self.delay.prepare(
                num_channels,
                sample_rate,
                max_block_size,
                MAX_DELAY_MS / 1000.0,
            )?;
        }

        let mut latency = 0;
        if self.routing.pitch {
            latency = self
                .voices
                .prepare(VOICE_COUNT, num_channels, sample_rate, max_block_size)?;
            self.push_transpose(params.pitch_offsets());
        }

        if self.routing.reverb {
            self.reverb.prepare(num_channels, sample_rate, max_block_size)?;
        }

        self.sample_rate = sample_rate;
        self.max_block_size = max_block_size;
        self.num_channels = num_channels;
        self.delay_gain = DELAY_WRITE_GAIN * params.snapshot().clamped().delay_level;
        self.latency = u32::try_from(latency).unwrap_or(u32::MAX);
        self.prepared = true;

        nih_log!(
            "prepared {:?}: {} ch @ {} Hz, max block {}, latency {} samples",
            self.routing,
            num_channels,
            sample_rate,
            max_block_size,
            self.latency
        );

        Ok(())
    }
}

impl<E, R> ShimmerProcessor<E, R>
where
    E: PitchShiftEngine,
    R: ReverbAlgorithm,
{
    pub fn routing(&self) -> Routing {
        self.routing
    }

    /// Latency to report to the host. Fixed between `prepare()` calls.
    pub fn latency_samples(&self) -> u32 {
        self.latency
    }

    /// Drop all history (echoes, voice state, reverb tail) without
    /// reallocating.
    pub fn reset(&mut self) {
        self.delay.clear();
        self.voices.reset();
        self.reverb.reset();
    }

    /// Process one host block in place.
    ///
    /// `buffer` holds every output channel; the first `input_channels` of
    /// them carry input. `length` is this block's sample count.
    pub fn process_block<B: AsMut<[f32]>>(
        &mut self,
        buffer: &mut [B],
        input_channels: usize,
        length: usize,
        params: &impl ParameterSource,
    ) {
        // 1. Channels past the inputs hold whatever the host left there.
        for channel in buffer.iter_mut().skip(input_channels) {
            let channel = channel.as_mut();
            let len = length.min(channel.len());
            channel[..len].fill(0.0);
        }

        // 2. Bypass is all-or-nothing for the whole block.
        if params.is_bypassed() {
            return;
        }

        if !self.prepared {
            nih_debug_assert_failure!("process_block() called before prepare()");
            for channel in buffer.iter_mut() {
                let channel = channel.as_mut();
                let len = length.min(channel.len());
                channel[..len].fill(0.0);
            }
            return;
        }

        nih_debug_assert!(length <= self.max_block_size);
        if length > self.max_block_size {
            // Nothing past the prepared size gets processed, so it must
            // not pass through as dry input either.
            for channel in buffer.iter_mut() {
                let channel = channel.as_mut();
                let len = length.min(channel.len());
                if len > self.max_block_size {
                    channel[self.max_block_size..len].fill(0.0);
                }
            }
        }
        let length = length.min(self.max_block_size);
        let channels = input_channels.min(self.num_channels).min(buffer.len());

        // 3.
        let snapshot = params.snapshot().clamped();

        // 4.
        for ((channel, dry), wet) in buffer
            .iter_mut()
            .zip(&mut self.dry)
            .zip(&mut self.wet)
            .take(channels)
        {
            let channel = channel.as_mut();
            let len = length.min(channel.len());
            dry[..len].copy_from_slice(&channel[..len]);
            dry[len..length].fill(0.0);
            wet[..length].fill(0.0);
        }

        let dry = &self.dry[..channels];
        let wet = &mut self.wet[..channels];

        if self.routing.pitch {
            self.voices.process(dry, length);
            self.voices.mix(&snapshot.voice_weights(), wet, length);
        }

        if self.routing.delay {
            // Write before reading so delays shorter than the block read
            // this block's samples, not stale ring contents.
            let gain = DELAY_WRITE_GAIN * snapshot.delay_level;
            for (ch, (dry, wet)) in dry.iter().zip(wet.iter_mut()).enumerate() {
                self.delay.write(ch, dry, length, self.delay_gain, gain);
                self.delay.read_delayed(
                    ch,
                    wet,
                    length,
                    snapshot.delay_time_ms,
                    self.sample_rate,
                );
            }
            self.delay_gain = gain;
        }

        if self.routing.reverb {
            self.reverb.update_coefficients(&snapshot);
            self.reverb.apply(wet, length);
        }

        // 5.
        let wet_gain = snapshot.mix;
        let dry_gain = 1.0 - snapshot.mix;
        for ((channel, dry), wet) in buffer.iter_mut().zip(dry).zip(wet.iter()) {
            let channel = channel.as_mut();
            let len = length.min(channel.len());
            for ((out, &d), &w) in channel[..len].iter_mut().zip(&dry[..len]).zip(&wet[..len]) {
                *out = dry_gain * d + wet_gain * w;
            }
        }

        // 6. Heard from the next block on.
        if self.routing.pitch {
            self.push_transpose(params.pitch_offsets());
        }

        // 7.
        if self.routing.delay {
            self.delay.advance(length);
        }
    }

    /// Hand the voices their transposes, clamped to the parameter range
    /// whatever the engine accepts.
    fn push_transpose(&mut self, offsets: [i32; VOICE_COUNT]) {
        for (voice, semitones) in offsets.into_iter().enumerate() {
            self.voices.set_voice_transpose(
                voice,
                semitones.clamp(MIN_PITCH, MAX_PITCH),
                TONALITY_LIMIT_HZ,
            );
        }
    }
}

#[cfg(test)]
impl<E, R> ShimmerProcessor<E, R> {
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    pub fn delay_line(&self) -> &DelayLine {
        &self.delay
    }

    pub fn voices(&self) -> &PitchVoiceMixer<E> {
        &self.voices
    }

    pub fn reverb(&self) -> &ReverbSend<R> {
        &self.reverb
    }
}

// ─────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────
