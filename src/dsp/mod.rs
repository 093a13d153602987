//! # DSP Building Blocks
//!
//! - **`delay_line`**: the block-based circular buffer behind the echo.
//! - **`pitch_shift`**: the pitch-shift engine interface and the two-tap
//!   delay-line shifter the shimmer voices run on.
//! - **`reverb`**: the reverb algorithm interface and a Freeverb
//!   implementation.

pub mod delay_line;
pub mod pitch_shift;
pub mod reverb;
