//! Errors raised while preparing the signal path.
//!
//! Nothing in the per-block path returns an error. Every fallible step
//! (validating the host configuration, allocating buffers) happens once in
//! `prepare`, and a failure there is reported to the host by refusing to
//! initialize.

use std::collections::TryReserveError;

use thiserror::Error;

/// Why a `prepare` call refused the host's configuration.
#[derive(Error, Debug)]
pub enum PrepareError {
    /// Zero, negative, NaN or infinite sample rate.
    #[error("sample rate must be positive and finite, got {0}")]
    InvalidSampleRate(f32),
    /// The host promised blocks of zero samples.
    #[error("maximum block size must be at least one sample")]
    EmptyBlockSize,
    /// No channels, or more than the stage can handle.
    #[error("unsupported channel count: {0}")]
    UnsupportedChannelCount(usize),
    /// A buffer couldn't be reserved.
    #[error("could not allocate {what}: {source}")]
    Allocation {
        /// Which buffer, for the log message.
        what: &'static str,
        #[source]
        source: TryReserveError,
    },
}

/// Allocate a zeroed sample buffer without aborting on allocation failure.
pub(crate) fn zeroed_buffer(len: usize, what: &'static str) -> Result<Vec<f32>, PrepareError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|source| PrepareError::Allocation { what, source })?;
    buffer.resize(len, 0.0);
    Ok(buffer)
}

/// One zeroed buffer per channel.
pub(crate) fn zeroed_channels(
    num_channels: usize,
    len: usize,
    what: &'static str,
) -> Result<Vec<Vec<f32>>, PrepareError> {
    (0..num_channels).map(|_| zeroed_buffer(len, what)).collect()
}

pub(crate) fn check_sample_rate(sample_rate: f32) -> Result<(), PrepareError> {
    if sample_rate.is_finite() && sample_rate > 0.0 {
        Ok(())
    } else {
        Err(PrepareError::InvalidSampleRate(sample_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed_channels_are_silent_and_sized() {
        let channels = zeroed_channels(2, 64, "test buffer").unwrap();
        assert_eq!(channels.len(), 2);
        assert!(channels.iter().all(|c| c.len() == 64));
        assert!(channels.iter().flatten().all(|&s| s == 0.0));
    }

    #[test]
    fn test_rejects_bad_sample_rates() {
        assert!(check_sample_rate(48000.0).is_ok());
        assert!(matches!(
            check_sample_rate(0.0),
            Err(PrepareError::InvalidSampleRate(_))
        ));
        assert!(check_sample_rate(f32::NAN).is_err());
        assert!(check_sample_rate(-44100.0).is_err());
    }
}
