//! PCM frames and the host-facing frame boundary
//!
//! The host pushes frames into a sender session and pulls frames out of a
//! receiver session. Frames are contiguous blocks of interleaved f32
//! samples, owned exclusively by the caller for the duration of a
//! read/write call.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Sample format of frames and packet payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// 32-bit IEEE float
    F32,
    /// 16-bit signed integer
    S16,
}

/// Audio frame containing interleaved samples
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Interleaved audio samples (f32)
    pub samples: Vec<f32>,
    /// Number of channels
    pub channels: u16,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Stream position of the first sample, in samples per channel
    pub timestamp: u64,
    /// Frame sequence number
    pub sequence: u32,
    /// True when this frame was synthesized to cover lost packets
    pub is_gap: bool,
}

impl Frame {
    pub fn new(
        samples: Vec<f32>,
        channels: u16,
        sample_rate: u32,
        timestamp: u64,
        sequence: u32,
    ) -> Self {
        Self {
            samples,
            channels,
            sample_rate,
            timestamp,
            sequence,
            is_gap: false,
        }
    }

    /// A silent gap frame covering `samples_per_channel` samples.
    pub fn gap(
        samples_per_channel: usize,
        channels: u16,
        sample_rate: u32,
        timestamp: u64,
        sequence: u32,
    ) -> Self {
        Self {
            samples: vec![0.0; samples_per_channel * channels as usize],
            channels,
            sample_rate,
            timestamp,
            sequence,
            is_gap: true,
        }
    }

    /// Number of samples per channel
    pub fn samples_per_channel(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Frame duration
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(
            (self.samples_per_channel() as u64 * 1_000_000) / self.sample_rate as u64,
        )
    }
}

/// Pull side of the host boundary: something frames can be read from.
///
/// Replaces the asynchronous pop/rewind callback style of audio-server
/// plugin APIs with explicit blocking-with-timeout reads.
pub trait FrameSource {
    /// Read the next frame, waiting at most `timeout`.
    ///
    /// `Ok(None)` means the source produced nothing within the timeout;
    /// end of stream is reported through session state, not here.
    fn read_frame(&mut self, timeout: Duration) -> Result<Option<Frame>>;
}

/// Push side of the host boundary: something frames can be written to.
pub trait FrameSink {
    /// Write a frame, waiting at most `timeout` for capacity.
    ///
    /// Returns `false` if the sink had no capacity within the timeout.
    fn write_frame(&mut self, frame: Frame, timeout: Duration) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_duration() {
        let frame = Frame::new(vec![0.0; 960], 2, 48000, 0, 0);
        assert_eq!(frame.samples_per_channel(), 480);
        assert_eq!(frame.duration(), Duration::from_millis(10));
    }

    #[test]
    fn test_gap_frame_is_silent() {
        let frame = Frame::gap(120, 2, 48000, 500, 3);
        assert!(frame.is_gap);
        assert_eq!(frame.samples.len(), 240);
        assert!(frame.samples.iter().all(|&s| s == 0.0));
    }
}
