//! PCM sample jitter buffer (component C1, buffering half).
//!
//! Unlike the packet-reordering jitter buffers common in general-purpose
//! media stacks, this buffer sits downstream of codec decode: the RTP
//! receive callback decodes each incoming frame to PCM and writes the
//! samples in arrival order, and the AMD analyzer and any other sample
//! consumer read them back as a flat stream. Depth is measured in samples
//! at 8 kHz, so 1600 samples is 200 ms.

use std::collections::VecDeque;
use tracing::warn;

/// Default buffer depth: 200 ms at 8 kHz.
pub const DEFAULT_DEPTH_SAMPLES: usize = 1600;

/// A bounded FIFO of decoded PCM samples.
///
/// Writes past the configured depth drop the oldest samples rather than
/// the new ones, so a consumer that falls behind always sees the most
/// recent audio instead of a growing backlog of stale audio.
pub struct JitterBuffer {
    depth_samples: usize,
    samples: VecDeque<i16>,
    dropped_samples: u64,
}

impl JitterBuffer {
    /// Create a buffer holding at most `depth_samples` samples.
    pub fn new(depth_samples: usize) -> Self {
        Self {
            depth_samples,
            samples: VecDeque::with_capacity(depth_samples),
            dropped_samples: 0,
        }
    }

    /// Append decoded PCM samples, dropping the oldest samples if the
    /// write would exceed the configured depth.
    pub fn write(&mut self, pcm: &[i16]) {
        self.samples.extend(pcm.iter().copied());
        let overflow = self.samples.len().saturating_sub(self.depth_samples);
        if overflow > 0 {
            self.samples.drain(..overflow);
            self.dropped_samples += overflow as u64;
            warn!(overflow, "jitter buffer overflow, dropped oldest samples");
        }
    }

    /// Remove and return up to `n` samples in write order. Returns an
    /// empty vector on underflow rather than blocking or erroring — the
    /// caller decides what to do with silence.
    pub fn read(&mut self, n: usize) -> Vec<i16> {
        let take = n.min(self.samples.len());
        self.samples.drain(..take).collect()
    }

    /// Drain and return every buffered sample.
    pub fn drain_all(&mut self) -> Vec<i16> {
        self.samples.drain(..).collect()
    }

    /// Number of samples currently buffered.
    pub fn available(&self) -> usize {
        self.samples.len()
    }

    /// Total samples ever dropped for overflow, for diagnostics.
    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_back_in_write_order() {
        let mut buf = JitterBuffer::new(10);
        buf.write(&[1, 2, 3]);
        buf.write(&[4, 5]);
        assert_eq!(buf.read(4), vec![1, 2, 3, 4]);
        assert_eq!(buf.available(), 1);
        assert_eq!(buf.read(10), vec![5]);
    }

    #[test]
    fn underflow_returns_partial_read() {
        let mut buf = JitterBuffer::new(10);
        buf.write(&[1, 2]);
        assert_eq!(buf.read(5), vec![1, 2]);
        assert!(buf.read(5).is_empty());
    }

    #[test]
    fn overflow_drops_oldest_samples() {
        let mut buf = JitterBuffer::new(4);
        buf.write(&[1, 2, 3, 4]);
        buf.write(&[5, 6]);
        assert_eq!(buf.available(), 4);
        assert_eq!(buf.read(4), vec![3, 4, 5, 6]);
        assert_eq!(buf.dropped_samples(), 2);
    }

    #[test]
    fn drain_all_empties_the_buffer() {
        let mut buf = JitterBuffer::new(10);
        buf.write(&[1, 2, 3]);
        assert_eq!(buf.drain_all(), vec![1, 2, 3]);
        assert!(buf.is_empty());
    }
}
