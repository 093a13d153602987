//! # Circular Delay Line (Block-Based Ring Buffer)
//!
//! A multi-channel ring buffer that stores the recent history of the dry
//! input and plays it back a fixed time later. Unlike a per-sample delay,
//! this one moves whole host blocks at a time: one `write()` and one
//! `read_delayed()` per channel per block, then a single `advance()`.
//!
//! ## Capacity
//!
//! ```text
//! C = ceil(max_delay_seconds * sample_rate) + max_block_size
//! ```
//!
//! The extra `max_block_size` samples let a full block be written *and*
//! the longest delay be read back within the same block without the
//! write overtaking the region being read.
//!
//! ## Wraparound
//!
//! A block that starts near the end of the ring is split into two
//! contiguous copies:
//!
//! ```text
//!            write_pos                C
//!                │◄──── first ────►│
//! ring: [■■■■■■■■■□□□□□□□□□□□□□□□□□□]
//!        │◄─ second ─►│
//!        0
//! ```
//!
//! Reads split the same way. Gain ramps are computed from the sample's
//! index in the *logical* block, so a ramp that straddles the wrap point
//! continues smoothly instead of restarting.
//!
//! ## Delay-Time Changes
//!
//! The read position is recomputed from the delay time each block, so an
//! automated delay time jumps to the new position at block boundaries.
//! Fast delay-time automation is audible as small discontinuities.

use nih_plug::{nih_debug_assert, nih_debug_assert_failure};

use crate::error::{self, PrepareError};

/// A fixed-capacity, multi-channel ring buffer driven one block at a time.
///
/// All memory is allocated in [`prepare()`](Self::prepare). `write()`,
/// `read_delayed()` and `advance()` never allocate.
pub struct DelayLine {
    /// One ring per channel, each `capacity` samples long.
    channels: Vec<Vec<f32>>,

    /// `C` in the module docs. Zero until the first `prepare()`.
    capacity: usize,

    /// Largest block the host promised to send. Longer blocks are a
    /// contract violation and get clamped.
    max_block_size: usize,

    /// Where the current block's first sample is written. Always in
    /// `[0, capacity)` once prepared.
    write_pos: usize,
}

impl Default for DelayLine {
    fn default() -> Self {
        Self::new()
    }
}

impl DelayLine {
    /// Create an unprepared delay line. It holds no memory until
    /// [`prepare()`](Self::prepare) is called.
    pub fn new() -> Self {
        Self {
            channels: Vec::new(),
            capacity: 0,
            max_block_size: 0,
            write_pos: 0,
        }
    }

    /// (Re)allocate the ring for a new host configuration.
    ///
    /// Must be called before first use and again whenever the sample rate
    /// or maximum block size changes. The ring starts out silent and the
    /// write position is rewound to 0.
    pub fn prepare(
        &mut self,
        num_channels: usize,
        sample_rate: f32,
        max_block_size: usize,
        max_delay_seconds: f32,
    ) -> Result<(), PrepareError> {
        error::check_sample_rate(sample_rate)?;
        if max_block_size == 0 {
            return Err(PrepareError::EmptyBlockSize);
        }
        if num_channels == 0 {
            return Err(PrepareError::UnsupportedChannelCount(num_channels));
        }

        let max_delay_samples = (max_delay_seconds.max(0.0) * sample_rate).ceil() as usize;
        let capacity = max_delay_samples + max_block_size;

        self.channels = error::zeroed_channels(num_channels, capacity, "delay line")?;
        self.capacity = capacity;
        self.max_block_size = max_block_size;
        self.write_pos = 0;

        Ok(())
    }

    /// Total ring length `C` in samples.
    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[cfg(test)]
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Where the current block will be written.
    #[cfg(test)]
    pub fn write_position(&self) -> usize {
        self.write_pos
    }

    /// Copy `length` samples of `source` into the ring at the write
    /// position, scaled by a linear ramp from `start_gain` to `end_gain`.
    ///
    /// Sample `i` of the block gets `start_gain + (end_gain - start_gain) * i / length`.
    /// The write position is *not* moved; call [`advance()`](Self::advance)
    /// once all channels are done.
    pub fn write(
        &mut self,
        channel: usize,
        source: &[f32],
        length: usize,
        start_gain: f32,
        end_gain: f32,
    ) {
        let length = self.checked_length(length, source.len());
        let capacity = self.capacity;
        let write_pos = self.write_pos;
        let Some(ring) = self.channels.get_mut(channel) else {
            nih_debug_assert_failure!("delay line write to missing channel {}", channel);
            return;
        };
        if length == 0 {
            return;
        }

        let step = (end_gain - start_gain) / length as f32;
        let first = length.min(capacity - write_pos);

        // [write_pos, C) then [0, length - first). `i` keeps counting
        // across the split so the ramp is one continuous line.
        for (i, (slot, &sample)) in ring[write_pos..write_pos + first]
            .iter_mut()
            .zip(&source[..first])
            .enumerate()
        {
            *slot = sample * (start_gain + step * i as f32);
        }
        for (i, (slot, &sample)) in ring[..length - first]
            .iter_mut()
            .zip(&source[first..length])
            .enumerate()
        {
            *slot = sample * (start_gain + step * (first + i) as f32);
        }
    }

    /// Add `length` samples from `delay_ms` in the past onto `dest`.
    ///
    /// The delayed signal is *summed* into `dest`, never copied over it,
    /// so whatever is already in `dest` (a dry signal, other wet sources)
    /// is preserved.
    ///
    /// ```text
    /// delay_samples = floor(sample_rate * delay_ms / 1000), at most C - 1
    /// read_pos      = (C + write_pos - delay_samples) % C
    /// ```
    pub fn read_delayed(
        &self,
        channel: usize,
        dest: &mut [f32],
        length: usize,
        delay_ms: f32,
        sample_rate: f32,
    ) {
        let length = self.checked_length(length, dest.len());
        let Some(ring) = self.channels.get(channel) else {
            nih_debug_assert_failure!("delay line read from missing channel {}", channel);
            return;
        };
        if length == 0 {
            return;
        }

        let delay_samples = self.delay_samples(delay_ms, sample_rate);
        let read_pos = (self.capacity + self.write_pos - delay_samples) % self.capacity;
        let first = length.min(self.capacity - read_pos);

        for (out, &delayed) in dest[..first]
            .iter_mut()
            .zip(&ring[read_pos..read_pos + first])
        {
            *out += delayed;
        }
        for (out, &delayed) in dest[first..length].iter_mut().zip(&ring[..length - first]) {
            *out += delayed;
        }
    }

    /// Move the write position forward by one block.
    ///
    /// Call exactly once per processed block, after every channel has been
    /// written and read.
    pub fn advance(&mut self, length: usize) {
        if self.capacity == 0 {
            nih_debug_assert_failure!("delay line advanced before prepare()");
            return;
        }
        nih_debug_assert!(length <= self.max_block_size);
        let length = length.min(self.max_block_size);

        self.write_pos = (self.write_pos + length) % self.capacity;
    }

    /// Silence the ring and rewind the write position.
    pub fn clear(&mut self) {
        for ring in &mut self.channels {
            ring.fill(0.0);
        }
        self.write_pos = 0;
    }

    /// Convert a delay time to a whole number of samples, clamped to the
    /// oldest sample still in the ring.
    pub fn delay_samples(&self, delay_ms: f32, sample_rate: f32) -> usize {
        let samples = (sample_rate * delay_ms.max(0.0) / 1000.0).floor() as usize;
        samples.min(self.capacity.saturating_sub(1))
    }

    /// Clamp a requested block length to what the ring and the caller's
    /// slice can hold. Oversized requests fail loudly in debug builds.
    fn checked_length(&self, length: usize, slice_len: usize) -> usize {
        if self.capacity == 0 {
            nih_debug_assert_failure!("delay line used before prepare()");
            return 0;
        }
        nih_debug_assert!(
            length <= self.max_block_size && length <= slice_len,
            "block of {} samples exceeds max block {} or slice {}",
            length,
            self.max_block_size,
            slice_len
        );

        length.min(self.max_block_size).min(slice_len)
    }
}

// ─────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    /// 1 kHz keeps the sample/millisecond arithmetic readable: 1 ms = 1 sample.
    const SR: f32 = 1000.0;

    fn prepared(max_block: usize, max_delay_seconds: f32) -> DelayLine {
        let mut dl = DelayLine::new();
        dl.prepare(1, SR, max_block, max_delay_seconds).unwrap();
        dl
    }

    #[test]
    fn test_capacity_covers_delay_and_block() {
        let mut dl = DelayLine::new();
        dl.prepare(2, 48000.0, 512, 1.9).unwrap();

        assert_eq!(dl.capacity(), 91_200 + 512);
        assert_eq!(dl.num_channels(), 2);
        assert_eq!(dl.write_position(), 0);
    }

    #[test]
    fn test_prepare_rejects_bad_config() {
        let mut dl = DelayLine::new();
        assert!(matches!(
            dl.prepare(2, 48000.0, 0, 1.0),
            Err(PrepareError::EmptyBlockSize)
        ));
        assert!(matches!(
            dl.prepare(0, 48000.0, 64, 1.0),
            Err(PrepareError::UnsupportedChannelCount(0))
        ));
        assert!(dl.prepare(2, 0.0, 64, 1.0).is_err());
    }

    /// Reading with the same delay as the block length returns the
    /// previous block unchanged.
    #[test]
    fn test_block_round_trip() {
        let mut dl = prepared(4, 0.01);
        let block_a = [1.0, 2.0, 3.0, 4.0];
        let block_b = [5.0, 6.0, 7.0, 8.0];

        dl.write(0, &block_a, 4, 1.0, 1.0);
        dl.advance(4);
        dl.write(0, &block_b, 4, 1.0, 1.0);

        let mut out = [0.0; 4];
        dl.read_delayed(0, &mut out, 4, 4.0, SR);
        assert_eq!(out, block_a);
    }

    /// Delayed samples are summed onto whatever is already in `dest`.
    #[test]
    fn test_read_is_additive() {
        let mut dl = prepared(4, 0.01);
        dl.write(0, &[1.0; 4], 4, 1.0, 1.0);

        let mut out = [0.5; 4];
        dl.read_delayed(0, &mut out, 4, 0.0, SR);
        assert_eq!(out, [1.5; 4]);
    }

    /// A zero delay reads the block that was just written, so short
    /// delays never see stale ring contents.
    #[test]
    fn test_delay_shorter_than_block_reads_current_block() {
        let mut dl = prepared(4, 0.01);
        dl.write(0, &[1.0, 2.0, 3.0, 4.0], 4, 1.0, 1.0);

        let mut out = [0.0; 4];
        dl.read_delayed(0, &mut out, 4, 2.0, SR);
        // Two samples back from the start of this block is silence, then
        // the first half of the block itself.
        assert_eq!(out, [0.0, 0.0, 1.0, 2.0]);
    }

    /// The gain ramp is one line across both halves of a wrapped write.
    #[test]
    fn test_gain_ramp_continues_across_wrap() {
        // C = 10 + 4 = 14. Three advances of 4 leave write_pos at 12, so a
        // 4-sample write lands in slots 12, 13, 0, 1.
        let mut dl = prepared(4, 0.01);
        for _ in 0..3 {
            dl.advance(4);
        }
        assert_eq!(dl.write_position(), 12);

        dl.write(0, &[1.0; 4], 4, 0.0, 1.0);

        let ring = &dl.channels[0];
        assert_relative_eq!(ring[12], 0.0);
        assert_relative_eq!(ring[13], 0.25);
        assert_relative_eq!(ring[0], 0.5);
        assert_relative_eq!(ring[1], 0.75);
    }

    #[test]
    fn test_read_across_wrap() {
        let mut dl = prepared(4, 0.01);
        for _ in 0..3 {
            dl.advance(4);
        }
        dl.write(0, &[1.0, 2.0, 3.0, 4.0], 4, 1.0, 1.0);
        dl.advance(4);
        assert_eq!(dl.write_position(), 2);

        let mut out = [0.0; 4];
        dl.read_delayed(0, &mut out, 4, 4.0, SR);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_delay_clamped_to_oldest_sample() {
        let dl = prepared(4, 0.01);
        assert_eq!(dl.delay_samples(1_000_000.0, SR), dl.capacity() - 1);
        assert_eq!(dl.delay_samples(-5.0, SR), 0);
        assert_eq!(dl.delay_samples(2.9, SR), 2);
    }

    #[test]
    fn test_clear_silences_and_rewinds() {
        let mut dl = prepared(4, 0.01);
        dl.write(0, &[1.0; 4], 4, 1.0, 1.0);
        dl.advance(4);
        dl.clear();

        assert_eq!(dl.write_position(), 0);
        let mut out = [0.0; 4];
        dl.read_delayed(0, &mut out, 4, 4.0, SR);
        assert_eq!(out, [0.0; 4]);
    }

    /// 48 kHz, 512-sample blocks, 250 ms: an impulse written with the 0.8
    /// write gain shows up 12000 samples later.
    #[test]
    fn test_impulse_reappears_after_delay() {
        let mut dl = DelayLine::new();
        dl.prepare(1, 48000.0, 512, 1.9).unwrap();
        assert_eq!(dl.delay_samples(250.0, 48000.0), 12_000);

        let mut stream = Vec::new();
        for block in 0..30 {
            let mut input = [0.0f32; 512];
            if block == 0 {
                input[0] = 1.0;
            }
            let mut out = input;
            dl.write(0, &input, 512, 0.8, 0.8);
            dl.read_delayed(0, &mut out, 512, 250.0, 48000.0);
            dl.advance(512);
            stream.extend_from_slice(&out);
        }

        assert_relative_eq!(stream[0], 1.0);
        assert_relative_eq!(stream[12_000], 0.8);
        let others = stream
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != 0 && i != 12_000)
            .map(|(_, s)| s.abs())
            .fold(0.0f32, f32::max);
        assert_eq!(others, 0.0);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic]
    fn test_oversized_write_rejected_in_debug() {
        let mut dl = prepared(4, 0.01);
        dl.write(0, &[1.0; 8], 8, 1.0, 1.0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        /// The write position stays inside the ring for long runs of
        /// random block lengths.
        #[test]
        fn prop_write_position_stays_in_range(
            lengths in proptest::collection::vec(0usize..=64, 10_000)
        ) {
            let mut dl = prepared(64, 0.05);
            for length in lengths {
                dl.advance(length);
                prop_assert!(dl.write_position() < dl.capacity());
            }
        }

        /// Ring reads match a plain linear history buffer for any block
        /// sequence and any delay up to the maximum, wrapped or not.
        #[test]
        fn prop_matches_linear_history(
            blocks in proptest::collection::vec((1usize..=16, 0usize..=40), 1..200)
        ) {
            let mut dl = prepared(16, 0.04);
            let mut history: Vec<f32> = Vec::new();
            let mut next = 1.0f32;

            for (length, delay) in blocks {
                let input: Vec<f32> = (0..length)
                    .map(|_| {
                        next += 1.0;
                        next
                    })
                    .collect();
                let block_start = history.len();
                history.extend_from_slice(&input);

                dl.write(0, &input, length, 1.0, 1.0);
                let mut out = vec![0.0; length];
                dl.read_delayed(0, &mut out, length, delay as f32, SR);
                dl.advance(length);

                for (n, &got) in out.iter().enumerate() {
                    let expected = (block_start + n)
                        .checked_sub(delay)
                        .map_or(0.0, |i| history[i]);
                    prop_assert_eq!(got, expected);
                }
            }
        }
    }
}
