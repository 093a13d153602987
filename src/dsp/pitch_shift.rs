//! # Pitch-Shift Engines
//!
//! The shimmer voices treat pitch shifting as a black box behind the
//! [`PitchShiftEngine`] trait. Anything that can be configured, reset,
//! transposed, asked for its latency and run over a block can sit behind
//! it. [`DelayPitchShifter`] is the engine the plugin ships with.
//!
//! ## How the Delay-Line Shifter Works
//!
//! Reading a delay line while its delay time shrinks plays the audio back
//! faster than it was recorded, which raises its pitch. Growing the delay
//! lowers it. To raise pitch by a ratio `r`, the delay must shrink by
//! `r - 1` samples every sample:
//!
//! ```text
//! delay[n + 1] = delay[n] - (r - 1)
//! ```
//!
//! A delay can't shrink forever, so it sweeps a window `[0, W)` and jumps
//! back to the other end when it runs out. The jump would click, so two
//! read taps run half a window apart and are crossfaded:
//!
//! ```text
//! delay
//!   W ┤╲      ╲      ╲         tap A: delay = phase · W
//!     │  ╲      ╲      ╲              gain  = sin²(π · phase)
//!     │    ╲      ╲      ╲     tap B: same, half a window later
//!   0 ┤      ╲      ╲      ╲          gain  = cos²(π · phase)
//!     └───────────────────────► time
//! ```
//!
//! Each tap jumps exactly when its gain is zero, and the two gains always
//! add up to one.
//!
//! ## Tonality Limit
//!
//! Above the tonality limit the engine gives up on pitch accuracy and
//! rolls the output off with a one-pole lowpass.

use std::f32::consts::PI;

use nih_plug::nih_debug_assert_failure;

use crate::error::{self, PrepareError};

/// Crossfade window. Longer windows smear transients, shorter ones add a
/// buzzy amplitude modulation.
const WINDOW_SECONDS: f32 = 0.05;

/// Transpose range accepted by the engines, in semitones.
pub const MIN_TRANSPOSE: f32 = -12.0;
pub const MAX_TRANSPOSE: f32 = 24.0;

/// A time/pitch transposition processor.
///
/// Each instance owns its own history; instances never share state, so any
/// number of them can run over the same input block.
pub trait PitchShiftEngine {
    /// Set up for `num_channels` channels at `sample_rate` with the
    /// engine's default settings. This is the only call allowed to
    /// allocate.
    fn configure_default(&mut self, num_channels: usize, sample_rate: f32)
        -> Result<(), PrepareError>;

    /// Forget all history. Configuration and transpose are kept.
    fn reset(&mut self);

    /// Change the transpose amount. Takes effect from the next sample
    /// processed.
    fn set_transpose_semitones(&mut self, semitones: f32, tonality_limit_hz: f32);

    /// How far behind its input the output runs, in samples.
    fn output_latency_samples(&self) -> usize;

    /// Run `input_len` samples per channel from `inputs` and write
    /// `output_len` samples per channel into `outputs`.
    fn process<I, O>(&mut self, inputs: &[I], input_len: usize, outputs: &mut [O], output_len: usize)
    where
        I: AsRef<[f32]>,
        O: AsMut<[f32]>;
}

/// A one-pole (6 dB/octave) lowpass, `y[n] = (1 - a)·x[n] + a·y[n-1]`.
#[derive(Debug, Clone, Copy, Default)]
struct OnePole {
    coefficient: f32,
    state: f32,
}

impl OnePole {
    /// `a = e^(-2π · cutoff / sample_rate)`, with the cutoff kept between
    /// 20 Hz and just below Nyquist.
    fn set_cutoff(&mut self, cutoff_hz: f32, sample_rate: f32) {
        let cutoff = cutoff_hz.clamp(20.0, sample_rate * 0.49);
        self.coefficient = (-2.0 * PI * cutoff / sample_rate).exp();
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        self.state = (1.0 - self.coefficient) * input + self.coefficient * self.state;
        self.state
    }
}

/// Per-channel history for [`DelayPitchShifter`].
struct ShiftChannel {
    /// `W + 2` samples of input history.
    ring: Vec<f32>,
    /// Slot the next input sample goes into.
    write_pos: usize,
    /// Tonality limit.
    lowpass: OnePole,
}

impl ShiftChannel {
    /// Read `delay` samples behind the most recent write, interpolating
    /// linearly between the two neighbouring slots.
    #[inline]
    fn read(&self, delay: f32) -> f32 {
        let len = self.ring.len();
        let delay_int = delay as usize;
        let frac = delay - delay_int as f32;

        let a = self.ring[(self.write_pos + len - delay_int) % len];
        let b = self.ring[(self.write_pos + len - delay_int - 1) % len];
        a * (1.0 - frac) + b * frac
    }
}

/// Two-tap crossfading delay-line pitch shifter.
pub struct DelayPitchShifter {
    /// Empty until `configure_default()`.
    channels: Vec<ShiftChannel>,
    sample_rate: f32,
    /// Sweep window `W` in samples.
    window: f32,
    /// Tap A's position in the window, `[0, 1)`. Tap B runs half a window
    /// behind. Shared by all channels so stereo images stay put.
    phase: f32,
    /// `2^(semitones / 12)`.
    ratio: f32,
    /// Lowpass cutoff, reapplied whenever the sample rate changes.
    tonality_limit_hz: f32,
}

impl Default for DelayPitchShifter {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            sample_rate: 0.0,
            window: 0.0,
            phase: 0.0,
            ratio: 1.0,
            tonality_limit_hz: 20_000.0,
        }
    }
}

impl DelayPitchShifter {
    /// Playback-rate ratio for the current transpose, `2^(semitones / 12)`.
    #[cfg(test)]
    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    fn is_configured(&self) -> bool {
        !self.channels.is_empty()
    }

    #[inline]
    fn tap_gain(phase: f32) -> f32 {
        let s = (PI * phase).sin();
        s * s
    }
}

impl PitchShiftEngine for DelayPitchShifter {
    fn configure_default(
        &mut self,
        num_channels: usize,
        sample_rate: f32,
    ) -> Result<(), PrepareError> {
        error::check_sample_rate(sample_rate)?;
        if num_channels == 0 {
            return Err(PrepareError::UnsupportedChannelCount(num_channels));
        }

        let window = (WINDOW_SECONDS * sample_rate).round().max(2.0);
        // Two extra slots: one for the interpolation neighbour, one so a
        // full-window delay never reads the slot being written.
        let ring_len = window as usize + 2;

        self.channels = (0..num_channels)
            .map(|_| {
                Ok(ShiftChannel {
                    ring: error::zeroed_buffer(ring_len, "pitch shifter history")?,
                    write_pos: 0,
                    lowpass: OnePole::default(),
                })
            })
            .collect::<Result<_, PrepareError>>()?;
        self.sample_rate = sample_rate;
        self.window = window;
        self.phase = 0.0;

        let limit = self.tonality_limit_hz;
        for channel in &mut self.channels {
            channel.lowpass.set_cutoff(limit, sample_rate);
        }

        Ok(())
    }

    fn reset(&mut self) {
        for channel in &mut self.channels {
            channel.ring.fill(0.0);
            channel.write_pos = 0;
            channel.lowpass.state = 0.0;
        }
        self.phase = 0.0;
    }

    fn set_transpose_semitones(&mut self, semitones: f32, tonality_limit_hz: f32) {
        let semitones = semitones.clamp(MIN_TRANSPOSE, MAX_TRANSPOSE);
        self.ratio = 2.0f32.powf(semitones / 12.0);
        self.tonality_limit_hz = tonality_limit_hz;

        if self.sample_rate > 0.0 {
            let sample_rate = self.sample_rate;
            for channel in &mut self.channels {
                channel.lowpass.set_cutoff(tonality_limit_hz, sample_rate);
            }
        }
    }

    fn output_latency_samples(&self) -> usize {
        (self.window / 2.0) as usize
    }

    fn process<I, O>(&mut self, inputs: &[I], input_len: usize, outputs: &mut [O], output_len: usize)
    where
        I: AsRef<[f32]>,
        O: AsMut<[f32]>,
    {
        if !self.is_configured() {
            nih_debug_assert_failure!("pitch shifter processed before configure_default()");
            for output in outputs.iter_mut() {
                let output = output.as_mut();
                let len = output_len.min(output.len());
                output[..len].fill(0.0);
            }
            return;
        }

        let window = self.window;
        let increment = (1.0 - self.ratio) / window;
        let start_phase = self.phase;
        let mut end_phase = start_phase;

        for (channel_idx, output) in outputs.iter_mut().enumerate() {
            let output = output.as_mut();
            let len = output_len.min(output.len());
            let Some(channel) = self.channels.get_mut(channel_idx) else {
                output[..len].fill(0.0);
                continue;
            };
            let input = inputs.get(channel_idx).map_or(&[][..], |i| i.as_ref());
            let input = &input[..input_len.min(input.len())];

            let ring_len = channel.ring.len();
            let mut phase = start_phase;
            for (n, out) in output[..len].iter_mut().enumerate() {
                // Past the end of the input the engine keeps running on
                // silence so the tail drains out.
                channel.ring[channel.write_pos] = input.get(n).copied().unwrap_or(0.0);

                let phase_b = (phase + 0.5).fract();
                let shifted = channel.read(phase * window) * Self::tap_gain(phase)
                    + channel.read(phase_b * window) * Self::tap_gain(phase_b);
                *out = channel.lowpass.process(shifted);

                channel.write_pos = (channel.write_pos + 1) % ring_len;
                phase = (phase + increment).rem_euclid(1.0);
            }
            end_phase = phase;
        }

        self.phase = end_phase;
    }
}

// ─────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────
