//! Receiver-side jitter buffer
//!
//! Absorbs out-of-order, duplicated and lost packets and releases frames
//! strictly in sequence order. Occupancy is measured in buffered duration
//! rather than packet count, since reconstructed packets may vary in
//! effective duration.
//!
//! State machine per receiving session:
//! `Filling -> Steady -> Draining (on underrun) -> Filling`.
//!
//! The release deadline for a missing sequence slot is driven by the
//! stream clock: once frames more than `target_latency` newer than the
//! hole have arrived, the slot is released as a silent gap and a loss
//! event is recorded. Frames are immutable after release.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::trace;

use crate::frame::Frame;
use crate::packet::seq_unroll;

/// Jitter buffer fill state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterState {
    /// Accumulating until buffered duration reaches the target latency
    Filling,
    /// Releasing frames in sequence order
    Steady,
    /// Underrun; waiting for the stream to resume
    Draining,
}

/// Result of a pop attempt
#[derive(Debug, Clone, PartialEq)]
pub enum JitterPop {
    /// Next frame in sequence order (may be a synthesized gap frame)
    Frame(Frame),
    /// Nothing releasable yet
    NotReady,
}

/// Jitter buffer statistics
#[derive(Debug, Default, Clone)]
pub struct JitterStats {
    pub received: u64,
    pub duplicates: u64,
    pub late: u64,
    /// Sequence slots released as silence after their deadline passed
    pub gaps: u64,
    pub released: u64,
}

impl JitterStats {
    pub fn loss_rate(&self) -> f32 {
        let total = self.released + self.gaps;
        if total == 0 {
            0.0
        } else {
            self.gaps as f32 / total as f32
        }
    }
}

pub struct JitterBuffer {
    /// Pending frames keyed by unrolled sequence number
    frames: BTreeMap<u64, Frame>,
    /// Unrolled sequence expected at the next release
    next_seq: u64,
    /// Stream timestamp expected at the next release (samples per channel)
    next_ts: u64,
    /// End timestamp of the newest frame seen
    newest_end_ts: u64,
    /// Samples per channel of the most recent frame, used to size gaps
    last_frame_samples: usize,
    started: bool,
    state: JitterState,
    target_samples: u64,
    sample_rate: u32,
    channels: u16,
    stats: JitterStats,
}

impl JitterBuffer {
    pub fn new(target_latency: Duration, sample_rate: u32, channels: u16) -> Self {
        let target_samples =
            (target_latency.as_micros() as u64 * sample_rate as u64) / 1_000_000;
        Self {
            frames: BTreeMap::new(),
            next_seq: 0,
            next_ts: 0,
            newest_end_ts: 0,
            last_frame_samples: 0,
            started: false,
            state: JitterState::Filling,
            target_samples,
            sample_rate,
            channels,
            stats: JitterStats::default(),
        }
    }

    pub fn state(&self) -> JitterState {
        self.state
    }

    pub fn stats(&self) -> JitterStats {
        self.stats.clone()
    }

    /// Buffered duration from the next release position to the newest
    /// frame end, holes included.
    pub fn occupancy(&self) -> Duration {
        if self.frames.is_empty() {
            return Duration::ZERO;
        }
        let samples = self.newest_end_ts.saturating_sub(self.next_ts);
        Duration::from_micros(samples * 1_000_000 / self.sample_rate.max(1) as u64)
    }

    /// Insert a received frame. Late and duplicate frames are counted and
    /// dropped; insertion never blocks release.
    pub fn insert(&mut self, frame: Frame) {
        let unrolled = if self.started {
            seq_unroll(self.next_seq, frame.sequence)
        } else {
            self.started = true;
            self.next_seq = frame.sequence as u64;
            self.next_ts = frame.timestamp;
            frame.sequence as u64
        };

        if unrolled < self.next_seq {
            self.stats.late += 1;
            return;
        }
        if self.frames.contains_key(&unrolled) {
            self.stats.duplicates += 1;
            return;
        }

        let end_ts = frame.timestamp + frame.samples_per_channel() as u64;
        self.newest_end_ts = self.newest_end_ts.max(end_ts);
        self.last_frame_samples = frame.samples_per_channel();
        self.stats.received += 1;
        self.frames.insert(unrolled, frame);

        if self.state == JitterState::Draining {
            self.state = JitterState::Filling;
        }
    }

    /// Release the next frame in sequence order, if the latency target and
    /// deadline policy allow it.
    pub fn pop(&mut self) -> JitterPop {
        match self.state {
            JitterState::Filling => {
                if self.occupied_samples() >= self.target_samples && !self.frames.is_empty() {
                    trace!(occupancy_ms = self.occupancy().as_millis() as u64, "jitter buffer filled");
                    self.state = JitterState::Steady;
                    self.release()
                } else {
                    JitterPop::NotReady
                }
            }
            JitterState::Steady => {
                if self.frames.is_empty() {
                    self.state = JitterState::Draining;
                    return JitterPop::NotReady;
                }
                self.release()
            }
            JitterState::Draining => JitterPop::NotReady,
        }
    }

    fn occupied_samples(&self) -> u64 {
        self.newest_end_ts.saturating_sub(self.next_ts)
    }

    fn release(&mut self) -> JitterPop {
        if let Some(frame) = self.frames.remove(&self.next_seq) {
            self.next_seq += 1;
            self.next_ts = frame.timestamp + frame.samples_per_channel() as u64;
            self.stats.released += 1;
            return JitterPop::Frame(frame);
        }

        // Hole at the head. Release it as silence only once the stream has
        // advanced a full latency target past it; otherwise keep waiting.
        if self.occupied_samples() >= self.target_samples {
            let samples = self.gap_samples();
            let frame = Frame::gap(
                samples,
                self.channels,
                self.sample_rate,
                self.next_ts,
                self.next_seq as u32,
            );
            self.next_seq += 1;
            self.next_ts += samples as u64;
            self.stats.gaps += 1;
            return JitterPop::Frame(frame);
        }

        JitterPop::NotReady
    }

    /// Size of a synthesized gap: up to the next buffered frame if it is
    /// the immediate successor, otherwise the last seen frame size.
    fn gap_samples(&self) -> usize {
        if let Some(frame) = self.frames.get(&(self.next_seq + 1)) {
            let span = frame.timestamp.saturating_sub(self.next_ts);
            if span > 0 {
                return span as usize;
            }
        }
        self.last_frame_samples.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 48000;
    const FRAME_SAMPLES: usize = 480; // 10 ms

    fn frame(seq: u32) -> Frame {
        Frame::new(
            vec![seq as f32; FRAME_SAMPLES * 2],
            2,
            RATE,
            seq as u64 * FRAME_SAMPLES as u64,
            seq,
        )
    }

    fn buffer(target_ms: u64) -> JitterBuffer {
        JitterBuffer::new(Duration::from_millis(target_ms), RATE, 2)
    }

    #[test]
    fn test_fills_before_releasing() {
        let mut jb = buffer(30);

        jb.insert(frame(0));
        jb.insert(frame(1));
        assert_eq!(jb.pop(), JitterPop::NotReady);
        assert_eq!(jb.state(), JitterState::Filling);

        // Third 10 ms frame reaches the 30 ms target.
        jb.insert(frame(2));
        assert!(matches!(jb.pop(), JitterPop::Frame(f) if f.sequence == 0));
        assert_eq!(jb.state(), JitterState::Steady);
    }

    #[test]
    fn test_reverse_arrival_releases_in_order() {
        let mut jb = buffer(30);

        // First insert pins the release position...
        jb.insert(frame(0));
        // ...then everything else arrives in reverse.
        for seq in [3u32, 2, 1] {
            jb.insert(frame(seq));
        }

        for expected in 0..4u32 {
            match jb.pop() {
                JitterPop::Frame(f) => {
                    assert_eq!(f.sequence, expected);
                    assert!(!f.is_gap);
                }
                other => panic!("expected frame {}, got {:?}", expected, other),
            }
        }
    }

    #[test]
    fn test_deadline_miss_releases_gap() {
        let mut jb = buffer(20);

        jb.insert(frame(0));
        // Frame 1 never arrives; 2..6 do, pushing the stream clock far
        // past the hole's deadline.
        for seq in 2..6u32 {
            jb.insert(frame(seq));
        }

        assert!(matches!(jb.pop(), JitterPop::Frame(f) if f.sequence == 0));
        match jb.pop() {
            JitterPop::Frame(f) => {
                assert_eq!(f.sequence, 1);
                assert!(f.is_gap);
                assert_eq!(f.samples_per_channel(), FRAME_SAMPLES);
            }
            other => panic!("expected gap frame, got {:?}", other),
        }
        assert_eq!(jb.stats().gaps, 1);

        // Release resumes with the real frame 2.
        assert!(matches!(jb.pop(), JitterPop::Frame(f) if f.sequence == 2 && !f.is_gap));
    }

    #[test]
    fn test_duplicates_and_late_counted() {
        let mut jb = buffer(10);

        jb.insert(frame(0));
        jb.insert(frame(0));
        assert_eq!(jb.stats().duplicates, 1);

        jb.insert(frame(1));
        assert!(matches!(jb.pop(), JitterPop::Frame(_)));

        // Sequence 0 was already released; a re-arrival is late.
        jb.insert(frame(0));
        assert_eq!(jb.stats().late, 1);
    }

    #[test]
    fn test_underrun_drains_then_refills() {
        let mut jb = buffer(10);

        jb.insert(frame(0));
        assert!(matches!(jb.pop(), JitterPop::Frame(_)));
        assert_eq!(jb.pop(), JitterPop::NotReady);
        assert_eq!(jb.state(), JitterState::Draining);

        // Stream resumes: back to filling, then steady.
        jb.insert(frame(1));
        assert_eq!(jb.state(), JitterState::Filling);
        assert!(matches!(jb.pop(), JitterPop::Frame(f) if f.sequence == 1));
        assert_eq!(jb.state(), JitterState::Steady);
    }

    #[test]
    fn test_occupancy_counts_duration_not_packets() {
        let mut jb = buffer(20);

        // A single 20 ms frame fills a 20 ms target on its own.
        let big = Frame::new(vec![0.0; 960 * 2], 2, RATE, 0, 0);
        jb.insert(big);
        assert!(matches!(jb.pop(), JitterPop::Frame(_)));
        assert_eq!(jb.state(), JitterState::Steady);
    }
}
