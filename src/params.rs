//! # Plugin Parameters
//!
//! Two halves:
//!
//! - [`ShimmerParams`] is the host-facing parameter store. nih-plug keeps
//!   each value in an atomic, so the UI and automation threads can write
//!   while the audio thread reads.
//! - [`ParameterSnapshot`] is a plain copy of every value the signal path
//!   needs, taken once at the start of a block. Everything downstream reads
//!   the snapshot, never the store, so a block can't see half of an
//!   automation change.
//!
//! Values are read unsmoothed. Parameter changes land on block boundaries.
//!
//! Once published, never change the `#[id = "..."]` strings or existing
//! presets will break.

use nih_plug::prelude::*;

/// Number of pitch-shifted voices in the shimmer.
pub const VOICE_COUNT: usize = 2;

/// Transpose range of each voice, in semitones.
pub const MIN_PITCH: i32 = -12;
pub const MAX_PITCH: i32 = 24;

/// Longest delay time. The delay line is sized for this.
pub const MAX_DELAY_MS: f32 = 1900.0;

/// How the two voice levels are derived.
#[derive(Enum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceMode {
    /// Each voice has its own level. Levels aren't normalized, so both at
    /// 100% is louder than either alone.
    #[name = "Levels"]
    Levels,
    /// A single balance knob crossfades voice 1 against voice 2.
    #[name = "Balance"]
    Balance,
}

/// Where the signal path reads its control values from.
///
/// Implemented by the host-facing [`ShimmerParams`] and by
/// [`ParameterSnapshot`] itself, so the processor can be driven with fixed
/// values outside a host.
pub trait ParameterSource {
    fn is_bypassed(&self) -> bool;

    /// Every control value, read once.
    fn snapshot(&self) -> ParameterSnapshot;

    /// Fresh transpose values for the voices, read after a block has been
    /// processed.
    fn pitch_offsets(&self) -> [i32; VOICE_COUNT];
}

/// One block's worth of control values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterSnapshot {
    /// Skip the whole block and leave the buffer untouched.
    pub bypass: bool,
    /// Master dry/wet: `wet = mix`, `dry = 1 - mix`.
    pub mix: f32,
    /// Per-voice levels, used in [`VoiceMode::Levels`].
    pub voice_levels: [f32; VOICE_COUNT],
    /// Per-voice transpose in semitones.
    pub pitch_offsets: [i32; VOICE_COUNT],
    /// Which of `voice_levels` or `balance` sets the voice weights.
    pub voice_mode: VoiceMode,
    /// Voice 1 vs. voice 2, used in [`VoiceMode::Balance`].
    pub balance: f32,
    /// Echo delay, `[0, MAX_DELAY_MS]`.
    pub delay_time_ms: f32,
    /// Send level into the delay line.
    pub delay_level: f32,
    /// Reverb wet share, before the room-size discount.
    pub reverb_mix: f32,
    pub room_size: f32,
    pub damping: f32,
    pub width: f32,
    /// Hold the reverb tail.
    pub freeze: bool,
}

impl Default for ParameterSnapshot {
    fn default() -> Self {
        Self {
            bypass: false,
            mix: 0.5,
            voice_levels: [0.5, 0.5],
            pitch_offsets: [12, 24],
            voice_mode: VoiceMode::Levels,
            balance: 0.5,
            delay_time_ms: 250.0,
            delay_level: 1.0,
            reverb_mix: 0.33,
            room_size: 0.5,
            damping: 0.5,
            width: 1.0,
            freeze: false,
        }
    }
}

/// Clamp to `[min, max]`, sending NaN to `min`.
fn clamp_or_min(value: f32, min: f32, max: f32) -> f32 {
    if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    }
}

impl ParameterSnapshot {
    /// Pull every value back into its declared range. Automation can feed
    /// out-of-range values; the signal path never fails on them.
    pub fn clamped(self) -> Self {
        Self {
            mix: clamp_or_min(self.mix, 0.0, 1.0),
            voice_levels: self.voice_levels.map(|l| clamp_or_min(l, 0.0, 1.0)),
            pitch_offsets: self.pitch_offsets.map(|p| p.clamp(MIN_PITCH, MAX_PITCH)),
            balance: clamp_or_min(self.balance, 0.0, 1.0),
            delay_time_ms: clamp_or_min(self.delay_time_ms, 0.0, MAX_DELAY_MS),
            delay_level: clamp_or_min(self.delay_level, 0.0, 1.0),
            reverb_mix: clamp_or_min(self.reverb_mix, 0.0, 1.0),
            room_size: clamp_or_min(self.room_size, 0.0, 1.0),
            damping: clamp_or_min(self.damping, 0.0, 1.0),
            width: clamp_or_min(self.width, 0.0, 1.0),
            ..self
        }
    }

    /// Gain applied to each voice when mixing the shimmer.
    ///
    /// Balance mode gives `[b, 1 - b]`; levels mode passes the levels
    /// through unchanged.
    pub fn voice_weights(&self) -> [f32; VOICE_COUNT] {
        match self.voice_mode {
            VoiceMode::Balance => [self.balance, 1.0 - self.balance],
            VoiceMode::Levels => self.voice_levels,
        }
    }
}

impl ParameterSource for ParameterSnapshot {
    fn is_bypassed(&self) -> bool {
        self.bypass
    }

    fn snapshot(&self) -> ParameterSnapshot {
        *self
    }

    fn pitch_offsets(&self) -> [i32; VOICE_COUNT] {
        self.pitch_offsets
    }
}

/// All user-facing parameters.
#[derive(Params)]
pub struct ShimmerParams {
    /// Host bypass. Checked once per block; when set, audio passes through
    /// bit-for-bit.
    #[id = "bypass"]
    pub bypass: BoolParam,

    /// **Mix**: linear crossfade between the dry input and the wet bus.
    #[id = "mix"]
    pub mix: FloatParam,

    /// **Pitch 1/2**: transpose of each shimmer voice, in semitones. One
    /// octave down to two octaves up.
    #[id = "pitch1"]
    pub pitch1: IntParam,

    /// **Level 1**: gain of the first voice in the shimmer, used when the
    /// voice mode is `Levels`.
    #[id = "level1"]
    pub level1: FloatParam,

    /// Transpose of the second voice. Same range as Pitch 1.
    #[id = "pitch2"]
    pub pitch2: IntParam,

    /// **Level 2**: gain of the second voice, used when the voice mode is
    /// `Levels`.
    #[id = "level2"]
    pub level2: FloatParam,

    /// **Voice Mode**: either two independent levels, or one balance knob.
    #[id = "vmode"]
    pub voice_mode: EnumParam<VoiceMode>,

    /// **Balance**: in `Balance` mode, 100% is all voice 1 and 0% is all
    /// voice 2.
    #[id = "balance"]
    pub balance: FloatParam,

    /// **Delay Time**. Changes jump straight to the new read position at
    /// the next block; there is no smoothing.
    #[id = "time"]
    pub delay_time: FloatParam,

    /// **Delay Level**: how much of the input is sent into the delay
    /// line. Changes ramp across one block.
    #[id = "dlevel"]
    pub delay_level: FloatParam,

    /// **Reverb Mix**. Larger rooms get a smaller share of wet signal for
    /// the same mix setting, so loudness stays roughly even across room
    /// sizes.
    #[id = "rvmix"]
    pub reverb_mix: FloatParam,

    /// **Room Size**: longer, denser tail toward 100%.
    #[id = "room"]
    pub room_size: FloatParam,

    /// **Damping**: how quickly high frequencies die away in the tail.
    #[id = "damp"]
    pub damping: FloatParam,

    /// **Width**: stereo spread of the reverb. 0% collapses it to mono.
    #[id = "width"]
    pub width: FloatParam,

    /// **Freeze**: hold the current reverb tail indefinitely.
    #[id = "freeze"]
    pub freeze: BoolParam,
}

fn percentage(name: &str, default: f32) -> FloatParam {
    FloatParam::new(name, default, FloatRange::Linear { min: 0.0, max: 1.0 })
        .with_unit("%")
        .with_value_to_string(formatters::v2s_f32_percentage(1))
        .with_string_to_value(formatters::s2v_f32_percentage())
}

fn semitones(name: &str, default: i32) -> IntParam {
    IntParam::new(
        name,
        default,
        IntRange::Linear {
            min: MIN_PITCH,
            max: MAX_PITCH,
        },
    )
    .with_unit(" st")
}

impl Default for ShimmerParams {
    fn default() -> Self {
        let defaults = ParameterSnapshot::default();

        Self {
            bypass: BoolParam::new("Bypass", defaults.bypass).make_bypass(),
            mix: percentage("Mix", defaults.mix),
            pitch1: semitones("Pitch 1", defaults.pitch_offsets[0]),
            level1: percentage("Level 1", defaults.voice_levels[0]),
            pitch2: semitones("Pitch 2", defaults.pitch_offsets[1]),
            level2: percentage("Level 2", defaults.voice_levels[1]),
            voice_mode: EnumParam::new("Voice Mode", defaults.voice_mode),
            balance: percentage("Balance", defaults.balance),

            delay_time: FloatParam::new(
                "Delay Time",
                defaults.delay_time_ms,
                FloatRange::Skewed {
                    min: 0.0,
                    max: MAX_DELAY_MS,
                    // More knob travel for short delays, where small
                    // changes are easiest to hear.
                    factor: FloatRange::skew_factor(-1.0),
                },
            )
            .with_unit(" ms")
            .with_step_size(1.0),
            delay_level: percentage("Delay Level", defaults.delay_level),

            reverb_mix: percentage("Reverb Mix", defaults.reverb_mix),
            room_size: percentage("Room Size", defaults.room_size),
            damping: percentage("Damping", defaults.damping),
            width: percentage("Width", defaults.width),
            freeze: BoolParam::new("Freeze", defaults.freeze),
        }
    }
}

impl ParameterSource for ShimmerParams {
    fn is_bypassed(&self) -> bool {
        self.bypass.value()
    }

    fn snapshot(&self) -> ParameterSnapshot {
        ParameterSnapshot {
            bypass: self.bypass.value(),
            mix: self.mix.value(),
            voice_levels: [self.level1.value(), self.level2.value()],
            pitch_offsets: self.pitch_offsets(),
            voice_mode: self.voice_mode.value(),
            balance: self.balance.value(),
            delay_time_ms: self.delay_time.value(),
            delay_level: self.delay_level.value(),
            reverb_mix: self.reverb_mix.value(),
            room_size: self.room_size.value(),
            damping: self.damping.value(),
            width: self.width.value(),
            freeze: self.freeze.value(),
        }
    }

    fn pitch_offsets(&self) -> [i32; VOICE_COUNT] {
        [self.pitch1.value(), self.pitch2.value()]
    }
}

// ─────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// The store's defaults and the snapshot's defaults are the same set.
    #[test]
    fn test_store_defaults_match_snapshot_defaults() {
        let params = ShimmerParams::default();
        assert_eq!(params.snapshot(), ParameterSnapshot::default());
        assert!(!params.is_bypassed());
        assert_eq!(params.pitch_offsets(), [12, 24]);
    }

    #[test]
    fn test_clamped_pulls_values_into_range() {
        let wild = ParameterSnapshot {
            mix: 1.5,
            voice_levels: [-0.5, f32::NAN],
            pitch_offsets: [-40, 99],
            balance: 2.0,
            delay_time_ms: 5000.0,
            delay_level: -1.0,
            reverb_mix: f32::INFINITY,
            room_size: -0.1,
            damping: 1.1,
            width: 3.0,
            ..ParameterSnapshot::default()
        }
        .clamped();

        assert_eq!(wild.mix, 1.0);
        assert_eq!(wild.voice_levels, [0.0, 0.0]);
        assert_eq!(wild.pitch_offsets, [MIN_PITCH, MAX_PITCH]);
        assert_eq!(wild.balance, 1.0);
        assert_eq!(wild.delay_time_ms, MAX_DELAY_MS);
        assert_eq!(wild.delay_level, 0.0);
        assert_eq!(wild.reverb_mix, 1.0);
        assert_eq!(wild.room_size, 0.0);
        assert_eq!(wild.damping, 1.0);
        assert_eq!(wild.width, 1.0);
    }

    #[test]
    fn test_in_range_values_survive_clamping() {
        let snapshot = ParameterSnapshot::default();
        assert_eq!(snapshot.clamped(), snapshot);
    }

    #[test]
    fn test_balance_weights() {
        let snapshot = ParameterSnapshot {
            voice_mode: VoiceMode::Balance,
            balance: 0.25,
            ..ParameterSnapshot::default()
        };
        let [w0, w1] = snapshot.voice_weights();
        assert_relative_eq!(w0, 0.25);
        assert_relative_eq!(w1, 0.75);
    }

    /// Levels are used as-is, even when they add up to more than one.
    #[test]
    fn test_level_weights_are_not_normalized() {
        let snapshot = ParameterSnapshot {
            voice_mode: VoiceMode::Levels,
            voice_levels: [1.0, 0.8],
            ..ParameterSnapshot::default()
        };
        assert_eq!(snapshot.voice_weights(), [1.0, 0.8]);
    }
}
