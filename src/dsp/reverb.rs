//! # Reverb Algorithms
//!
//! The reverb send stage drives any algorithm that implements
//! [`ReverbAlgorithm`]. The one shipped here, [`Freeverb`], is the classic
//! Jezar-at-Dreampoint design:
//!
//! ```text
//!          ┌─► [Comb 1] ─┐
//!          ├─► [Comb 2] ─┤
//! input ─►─┤     ...     ├─(+)─► [AP 1] ─► [AP 2] ─► [AP 3] ─► [AP 4] ─► wet
//!          └─► [Comb 8] ─┘
//! ```
//!
//! Eight lowpass-feedback comb filters in parallel build up the dense tail,
//! four allpasses in series diffuse it. The right channel uses the same
//! network with every delay 23 samples longer, which decorrelates the two
//! sides and gives the stereo spread that `width` crossfeeds.
//!
//! ## Freeze
//!
//! With freeze on, the combs' feedback goes to 1.0, damping to 0.0 and the
//! input gain to 0.0: nothing new enters and nothing already inside decays.

use nih_plug::nih_debug_assert_failure;

use crate::error::{self, PrepareError};

/// Comb delay times in samples at 44.1 kHz.
const COMB_TUNINGS: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];

/// Allpass delay times in samples at 44.1 kHz.
const ALLPASS_TUNINGS: [usize; 4] = [556, 441, 341, 225];

const STEREO_SPREAD: usize = 23;
const TUNING_SAMPLE_RATE: f32 = 44100.0;

const FIXED_GAIN: f32 = 0.015;
const WET_SCALE: f32 = 3.0;
const DRY_SCALE: f32 = 1.0;
const ROOM_SCALE: f32 = 0.28;
const ROOM_OFFSET: f32 = 0.7;
const DAMP_SCALE: f32 = 0.4;
const ALLPASS_FEEDBACK: f32 = 0.5;

/// The algorithm's native parameter set. All values are normalized to
/// `[0, 1]`; `freeze_mode >= 0.5` means frozen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReverbParameters {
    pub room_size: f32,
    pub damping: f32,
    pub wet_level: f32,
    pub dry_level: f32,
    pub width: f32,
    pub freeze_mode: f32,
}

impl Default for ReverbParameters {
    fn default() -> Self {
        Self {
            room_size: 0.5,
            damping: 0.5,
            wet_level: 0.33,
            dry_level: 0.4,
            width: 1.0,
            freeze_mode: 0.0,
        }
    }
}

impl ReverbParameters {
    pub fn is_frozen(&self) -> bool {
        self.freeze_mode >= 0.5
    }
}

/// An in-place reverb processor.
pub trait ReverbAlgorithm {
    /// Allocate for the given configuration. The only call allowed to
    /// allocate.
    fn prepare(
        &mut self,
        sample_rate: f32,
        max_block_size: usize,
        num_channels: usize,
    ) -> Result<(), PrepareError>;

    fn set_parameters(&mut self, params: ReverbParameters);

    /// A disabled reverb leaves blocks untouched.
    fn set_enabled(&mut self, enabled: bool);

    fn is_enabled(&self) -> bool;

    /// Clear the tail.
    fn reset(&mut self);

    /// Replace the first `length` samples of each channel with the reverb
    /// output (wet and dry mixed per the current parameters).
    fn process_in_place<B: AsMut<[f32]>>(&mut self, block: &mut [B], length: usize);
}

/// Lowpass-feedback comb filter.
struct Comb {
    buffer: Vec<f32>,
    index: usize,
    filter_store: f32,
}

impl Comb {
    fn new(size: usize) -> Result<Self, PrepareError> {
        Ok(Self {
            buffer: error::zeroed_buffer(size.max(1), "reverb comb")?,
            index: 0,
            filter_store: 0.0,
        })
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32, damp: f32) -> f32 {
        let output = self.buffer[self.index];
        self.filter_store = output * (1.0 - damp) + self.filter_store * damp;
        self.buffer[self.index] = input + self.filter_store * feedback;
        self.index = (self.index + 1) % self.buffer.len();
        output
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.index = 0;
        self.filter_store = 0.0;
    }
}

/// Schroeder allpass used for diffusion.
struct Allpass {
    buffer: Vec<f32>,
    index: usize,
}

impl Allpass {
    fn new(size: usize) -> Result<Self, PrepareError> {
        Ok(Self {
            buffer: error::zeroed_buffer(size.max(1), "reverb allpass")?,
            index: 0,
        })
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let buffered = self.buffer[self.index];
        self.buffer[self.index] = input + buffered * ALLPASS_FEEDBACK;
        self.index = (self.index + 1) % self.buffer.len();
        buffered - input
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.index = 0;
    }
}

/// One side of the stereo network.
struct Tank {
    combs: Vec<Comb>,
    allpasses: Vec<Allpass>,
}

impl Tank {
    fn new(sample_rate: f32, spread: usize) -> Result<Self, PrepareError> {
        let scale = sample_rate / TUNING_SAMPLE_RATE;
        let scaled = |tuning: usize| ((tuning + spread) as f32 * scale).round() as usize;

        Ok(Self {
            combs: COMB_TUNINGS
                .iter()
                .map(|&t| Comb::new(scaled(t)))
                .collect::<Result<_, _>>()?,
            allpasses: ALLPASS_TUNINGS
                .iter()
                .map(|&t| Allpass::new(scaled(t)))
                .collect::<Result<_, _>>()?,
        })
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32, damp: f32) -> f32 {
        let mut out = 0.0;
        for comb in &mut self.combs {
            out += comb.process(input, feedback, damp);
        }
        for allpass in &mut self.allpasses {
            out = allpass.process(out);
        }
        out
    }

    fn reset(&mut self) {
        for comb in &mut self.combs {
            comb.reset();
        }
        for allpass in &mut self.allpasses {
            allpass.reset();
        }
    }
}

/// Freeverb for mono or stereo blocks.
pub struct Freeverb {
    tanks: Vec<Tank>,
    params: ReverbParameters,
    enabled: bool,

    // Derived from `params` in `set_parameters()`.
    feedback: f32,
    damp: f32,
    gain: f32,
    wet1: f32,
    wet2: f32,
    dry: f32,
}

impl Default for Freeverb {
    fn default() -> Self {
        let mut reverb = Self {
            tanks: Vec::new(),
            params: ReverbParameters::default(),
            enabled: false,
            feedback: 0.0,
            damp: 0.0,
            gain: 0.0,
            wet1: 0.0,
            wet2: 0.0,
            dry: 0.0,
        };
        reverb.derive_coefficients();
        reverb
    }
}

impl Freeverb {
    fn derive_coefficients(&mut self) {
        let params = self.params;
        let wet = params.wet_level * WET_SCALE;
        self.wet1 = 0.5 * wet * (1.0 + params.width);
        self.wet2 = 0.5 * wet * (1.0 - params.width);
        self.dry = params.dry_level * DRY_SCALE;

        if params.is_frozen() {
            self.feedback = 1.0;
            self.damp = 0.0;
            self.gain = 0.0;
        } else {
            self.feedback = params.room_size * ROOM_SCALE + ROOM_OFFSET;
            self.damp = params.damping * DAMP_SCALE;
            self.gain = FIXED_GAIN;
        }
    }
}

#[cfg(test)]
impl Freeverb {
    pub fn parameters(&self) -> ReverbParameters {
        self.params
    }

    pub fn num_channels(&self) -> usize {
        self.tanks.len()
    }
}

impl ReverbAlgorithm for Freeverb {
    fn prepare(
        &mut self,
        sample_rate: f32,
        max_block_size: usize,
        num_channels: usize,
    ) -> Result<(), PrepareError> {
        error::check_sample_rate(sample_rate)?;
        if max_block_size == 0 {
            return Err(PrepareError::EmptyBlockSize);
        }
        if !(1..=2).contains(&num_channels) {
            return Err(PrepareError::UnsupportedChannelCount(num_channels));
        }

        self.tanks = (0..num_channels)
            .map(|channel| Tank::new(sample_rate, channel * STEREO_SPREAD))
            .collect::<Result<_, _>>()?;

        Ok(())
    }

    /// Called every block; coefficients are only rederived when something
    /// changed.
    fn set_parameters(&mut self, params: ReverbParameters) {
        if params == self.params {
            return;
        }
        self.params = params;
        self.derive_coefficients();
    }

    fn set_enabled(&mut self, enabled: bool) {
        if enabled && !self.enabled {
            self.reset();
        }
        self.enabled = enabled;
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn reset(&mut self) {
        for tank in &mut self.tanks {
            tank.reset();
        }
    }

    fn process_in_place<B: AsMut<[f32]>>(&mut self, block: &mut [B], length: usize) {
        if !self.is_enabled() {
            return;
        }
        if self.tanks.is_empty() {
            nih_debug_assert_failure!("reverb processed before prepare()");
            return;
        }

        let (feedback, damp, gain) = (self.feedback, self.damp, self.gain);
        let (wet1, wet2, dry) = (self.wet1, self.wet2, self.dry);

        match (block, self.tanks.as_mut_slice()) {
            ([left, right, ..], [tank_l, tank_r]) => {
                let left = left.as_mut();
                let right = right.as_mut();
                let len = length.min(left.len()).min(right.len());

                for (l, r) in left[..len].iter_mut().zip(&mut right[..len]) {
                    let input = (*l + *r) * gain;
                    let out_l = tank_l.process(input, feedback, damp);
                    let out_r = tank_r.process(input, feedback, damp);

                    let dry_l = *l;
                    let dry_r = *r;
                    *l = out_l * wet1 + out_r * wet2 + dry_l * dry;
                    *r = out_r * wet1 + out_l * wet2 + dry_r * dry;
                }
            }
            ([mono, ..], [tank, ..]) => {
                let mono = mono.as_mut();
                let len = length.min(mono.len());

                for sample in &mut mono[..len] {
                    let out = tank.process(*sample * gain, feedback, damp);
                    *sample = out * wet1 + *sample * dry;
                }
            }
            _ => {}
        }
    }
}

// ─────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn prepared(channels: usize) -> Freeverb {
        let mut reverb = Freeverb::default();
        reverb.prepare(48000.0, 512, channels).unwrap();
        reverb.set_enabled(true);
        reverb
    }

    fn impulse_response(reverb: &mut Freeverb, len: usize) -> Vec<Vec<f32>> {
        let mut block = vec![vec![0.0f32; len]; reverb.num_channels()];
        for channel in &mut block {
            channel[0] = 1.0;
        }
        reverb.process_in_place(&mut block, len);
        block
    }

    #[test]
    fn test_rejects_more_than_two_channels() {
        let mut reverb = Freeverb::default();
        assert!(matches!(
            reverb.prepare(48000.0, 512, 3),
            Err(PrepareError::UnsupportedChannelCount(3))
        ));
    }

    /// Wet at zero and dry at one is a straight passthrough.
    #[test]
    fn test_dry_only_is_transparent() {
        let mut reverb = prepared(2);
        reverb.set_parameters(ReverbParameters {
            wet_level: 0.0,
            dry_level: 1.0,
            ..ReverbParameters::default()
        });

        let input: Vec<f32> = (0..512).map(|n| (n as f32 * 0.01).sin()).collect();
        let mut block = vec![input.clone(), input.clone()];
        reverb.process_in_place(&mut block, 512);

        for channel in &block {
            for (&got, &expected) in channel.iter().zip(&input) {
                assert_relative_eq!(got, expected);
            }
        }
    }

    #[test]
    fn test_disabled_leaves_block_untouched() {
        let mut reverb = prepared(2);
        reverb.set_enabled(false);

        let mut block = vec![vec![0.25f32; 64]; 2];
        reverb.process_in_place(&mut block, 64);
        assert!(block.iter().flatten().all(|&s| s == 0.25));
    }

    /// An impulse produces a tail once the shortest comb has come around.
    #[test]
    fn test_impulse_produces_tail() {
        let mut reverb = prepared(2);
        reverb.set_parameters(ReverbParameters {
            wet_level: 1.0,
            dry_level: 0.0,
            ..ReverbParameters::default()
        });

        let response = impulse_response(&mut reverb, 4800);
        // Shortest comb is 1116 samples at 44.1 kHz, about 1215 at 48 kHz.
        assert!(response[0][..1000].iter().all(|&s| s == 0.0));
        assert!(response[0][1000..].iter().any(|s| s.abs() > 1e-4));
    }

    /// Frozen, the tail keeps its energy instead of decaying.
    #[test]
    fn test_freeze_sustains_tail() {
        let mut reverb = prepared(1);
        reverb.set_parameters(ReverbParameters {
            wet_level: 1.0,
            dry_level: 0.0,
            room_size: 0.5,
            ..ReverbParameters::default()
        });

        // Excite the tank, then freeze.
        let mut block = vec![vec![0.0f32; 4800]];
        for (n, sample) in block[0].iter_mut().enumerate().take(2400) {
            *sample = if n % 100 == 0 { 1.0 } else { 0.0 };
        }
        reverb.process_in_place(&mut block, 4800);

        reverb.set_parameters(ReverbParameters {
            freeze_mode: 1.0,
            ..reverb.parameters()
        });
        let energy = |reverb: &mut Freeverb| {
            let mut block = vec![vec![0.0f32; 9600]];
            reverb.process_in_place(&mut block, 9600);
            block[0].iter().map(|s| s * s).sum::<f32>()
        };
        let first = energy(&mut reverb);
        let later = energy(&mut reverb);

        assert!(first > 0.0);
        assert!(later > first * 0.5, "frozen tail decayed: {first} -> {later}");
    }

    #[test]
    fn test_reset_clears_tail() {
        let mut reverb = prepared(2);
        reverb.set_parameters(ReverbParameters {
            wet_level: 1.0,
            dry_level: 0.0,
            ..ReverbParameters::default()
        });
        impulse_response(&mut reverb, 2048);
        reverb.reset();

        let mut block = vec![vec![0.0f32; 4800]; 2];
        reverb.process_in_place(&mut block, 4800);
        assert!(block.iter().flatten().all(|&s| s == 0.0));
    }

    #[test]
    fn test_output_stays_bounded_at_max_room() {
        let mut reverb = prepared(2);
        reverb.set_parameters(ReverbParameters {
            room_size: 1.0,
            damping: 0.0,
            wet_level: 1.0,
            dry_level: 0.0,
            width: 1.0,
            freeze_mode: 0.0,
        });

        let mut block = vec![vec![0.1f32; 512]; 2];
        for _ in 0..200 {
            reverb.process_in_place(&mut block, 512);
            assert!(block.iter().flatten().all(|s| s.is_finite() && s.abs() < 10.0));
            for channel in &mut block {
                channel.fill(0.1);
            }
        }
    }
}
