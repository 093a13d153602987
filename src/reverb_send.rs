//! # Reverb Send Stage
//!
//! Translates the four musical reverb controls plus the reverb mix into the
//! reverb algorithm's native parameters, then runs the algorithm in place
//! over the wet bus. The dry input never passes through here; it is kept
//! aside for the final dry/wet crossfade.
//!
//! ## Coefficient Mapping
//!
//! ```text
//! wet_level = reverb_mix × (1 - 0.7 × room_size)
//! dry_level = 1 - reverb_mix
//! ```
//!
//! Large rooms sound louder for the same amount of wet signal, so the wet
//! level is discounted as the room grows. Damping, width and freeze pass
//! straight through.

use crate::dsp::reverb::{ReverbAlgorithm, ReverbParameters};
use crate::error::PrepareError;
use crate::params::ParameterSnapshot;

/// How much of the wet level the largest room gives up.
const ROOM_WET_DISCOUNT: f32 = 0.7;

/// The reverb coefficients derived for one block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReverbState {
    pub room_size: f32,
    pub damping: f32,
    /// `reverb_mix × (1 - 0.7 × room_size)`.
    pub wet_level: f32,
    /// `1 - reverb_mix`.
    pub dry_level: f32,
    pub width: f32,
    pub freeze: bool,
}

impl ReverbState {
    pub fn from_snapshot(snapshot: &ParameterSnapshot) -> Self {
        Self {
            room_size: snapshot.room_size,
            damping: snapshot.damping,
            wet_level: snapshot.reverb_mix * (1.0 - ROOM_WET_DISCOUNT * snapshot.room_size),
            dry_level: 1.0 - snapshot.reverb_mix,
            width: snapshot.width,
            freeze: snapshot.freeze,
        }
    }

    pub fn to_parameters(self) -> ReverbParameters {
        ReverbParameters {
            room_size: self.room_size,
            damping: self.damping,
            wet_level: self.wet_level,
            dry_level: self.dry_level,
            width: self.width,
            freeze_mode: if self.freeze { 1.0 } else { 0.0 },
        }
    }
}

/// Owns the reverb algorithm and the coefficients it was last given.
pub struct ReverbSend<R> {
    reverb: R,
    /// Coefficients from the most recent snapshot.
    state: ReverbState,
}

impl<R: ReverbAlgorithm + Default> Default for ReverbSend<R> {
    fn default() -> Self {
        Self {
            reverb: R::default(),
            state: ReverbState::from_snapshot(&ParameterSnapshot::default()),
        }
    }
}

impl<R: ReverbAlgorithm> ReverbSend<R> {
    pub fn prepare(
        &mut self,
        num_channels: usize,
        sample_rate: f32,
        max_block_size: usize,
    ) -> Result<(), PrepareError> {
        self.reverb.prepare(sample_rate, max_block_size, num_channels)?;
        self.reverb.set_parameters(self.state.to_parameters());
        self.reverb.set_enabled(true);
        Ok(())
    }

    /// Recompute the coefficients from this block's snapshot. Nothing is
    /// cached between blocks; the mapping is cheap and must track
    /// automation exactly.
    pub fn update_coefficients(&mut self, snapshot: &ParameterSnapshot) {
        self.state = ReverbState::from_snapshot(snapshot);
        self.reverb.set_parameters(self.state.to_parameters());
    }

    /// Run the reverb over the first `length` samples of the wet bus.
    pub fn apply<B: AsMut<[f32]>>(&mut self, block: &mut [B], length: usize) {
        self.reverb.process_in_place(block, length);
    }

    pub fn reset(&mut self) {
        self.reverb.reset();
    }

}

#[cfg(test)]
impl<R> ReverbSend<R> {
    pub fn state(&self) -> ReverbState {
        self.state
    }

    pub fn reverb(&self) -> &R {
        &self.reverb
    }
}

// ─────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────
