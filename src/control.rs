//! Control channel reports
//!
//! A bidirectional low-rate feedback channel runs next to the media and
//! repair sub-streams. Receivers send reception quality reports (loss,
//! jitter, measured latency); senders answer with stream position reports
//! that let the receiver map stream timestamps to wallclock. Reports are
//! carried in control packets using the same datagram envelope as media.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::PacketError;
use crate::packet::{Packet, Substream, FEC_GEOMETRY_NONE};

/// How often each side emits a report
pub const REPORT_INTERVAL: Duration = Duration::from_millis(100);

const RECEIVER_REPORT_TAG: u8 = 1;
const SENDER_REPORT_TAG: u8 = 2;

const RECEIVER_REPORT_SIZE: usize = 1 + 1 + 4 + 4 + 4 + 8;
const SENDER_REPORT_SIZE: usize = 1 + 8 + 8 + 4 + 4;

/// Reception quality feedback, receiver to sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverReport {
    /// Fraction of packets lost since the previous report, as a Q8 fixed
    /// point value (255 = 100%)
    pub fraction_lost: u8,
    /// Total packets lost since the session started
    pub cumulative_lost: u32,
    /// Highest media sequence number received
    pub highest_seq: u32,
    /// Interarrival jitter estimate, in samples of the packet encoding
    pub jitter: u32,
    /// End-to-end latency as measured by the receiver, in microseconds
    pub measured_latency_us: u64,
}

/// Stream position feedback, sender to receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderReport {
    /// Stream timestamp at the moment the report was generated
    pub stream_ts: u64,
    /// Sender wallclock at the same moment, microseconds since the epoch
    pub wallclock_us: u64,
    /// Media packets sent so far
    pub packet_count: u32,
    /// Media payload bytes sent so far
    pub byte_count: u32,
}

/// A parsed control packet payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    Receiver(ReceiverReport),
    Sender(SenderReport),
}

impl ControlMessage {
    /// Wrap the report in a control packet.
    pub fn into_packet(self, seq: u32, timestamp: u64) -> Packet {
        Packet {
            kind: Substream::Control,
            encoding: 0,
            seq,
            timestamp,
            fec: FEC_GEOMETRY_NONE,
            payload: self.to_payload(),
        }
    }

    fn to_payload(self) -> Bytes {
        match self {
            ControlMessage::Receiver(r) => {
                let mut buf = BytesMut::with_capacity(RECEIVER_REPORT_SIZE);
                buf.put_u8(RECEIVER_REPORT_TAG);
                buf.put_u8(r.fraction_lost);
                buf.put_u32(r.cumulative_lost);
                buf.put_u32(r.highest_seq);
                buf.put_u32(r.jitter);
                buf.put_u64(r.measured_latency_us);
                buf.freeze()
            }
            ControlMessage::Sender(r) => {
                let mut buf = BytesMut::with_capacity(SENDER_REPORT_SIZE);
                buf.put_u8(SENDER_REPORT_TAG);
                buf.put_u64(r.stream_ts);
                buf.put_u64(r.wallclock_us);
                buf.put_u32(r.packet_count);
                buf.put_u32(r.byte_count);
                buf.freeze()
            }
        }
    }

    /// Parse a control packet payload.
    pub fn parse(payload: &[u8]) -> Result<Self, PacketError> {
        if payload.is_empty() {
            return Err(PacketError::TooShort {
                required: 1,
                available: 0,
            });
        }
        let mut buf = payload;
        let tag = buf.get_u8();
        match tag {
            RECEIVER_REPORT_TAG => {
                if payload.len() < RECEIVER_REPORT_SIZE {
                    return Err(PacketError::TooShort {
                        required: RECEIVER_REPORT_SIZE,
                        available: payload.len(),
                    });
                }
                Ok(ControlMessage::Receiver(ReceiverReport {
                    fraction_lost: buf.get_u8(),
                    cumulative_lost: buf.get_u32(),
                    highest_seq: buf.get_u32(),
                    jitter: buf.get_u32(),
                    measured_latency_us: buf.get_u64(),
                }))
            }
            SENDER_REPORT_TAG => {
                if payload.len() < SENDER_REPORT_SIZE {
                    return Err(PacketError::TooShort {
                        required: SENDER_REPORT_SIZE,
                        available: payload.len(),
                    });
                }
                Ok(ControlMessage::Sender(SenderReport {
                    stream_ts: buf.get_u64(),
                    wallclock_us: buf.get_u64(),
                    packet_count: buf.get_u32(),
                    byte_count: buf.get_u32(),
                }))
            }
            other => Err(PacketError::UnknownKind(other)),
        }
    }
}

/// Builds receiver reports from interval deltas of the reception counters.
///
/// Loss is computed per reporting interval: expected packets from the
/// sequence number advance, received from the reception counter, the
/// difference mapped to the Q8 `fraction_lost` field.
#[derive(Debug, Default)]
pub struct ReportBuilder {
    prev_expected: u64,
    prev_received: u64,
    cumulative_lost: u64,
}

impl ReportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `expected` and `received` are monotonically increasing totals.
    pub fn build(
        &mut self,
        expected: u64,
        received: u64,
        highest_seq: u32,
        jitter: u32,
        measured_latency: Duration,
    ) -> ReceiverReport {
        let expected_delta = expected.saturating_sub(self.prev_expected);
        let received_delta = received.saturating_sub(self.prev_received);
        let lost_delta = expected_delta.saturating_sub(received_delta);
        self.prev_expected = expected;
        self.prev_received = received;
        self.cumulative_lost += lost_delta;

        let fraction_lost = if expected_delta == 0 {
            0
        } else {
            ((lost_delta * 256) / expected_delta).min(255) as u8
        };

        ReceiverReport {
            fraction_lost,
            cumulative_lost: self.cumulative_lost.min(u32::MAX as u64) as u32,
            highest_seq,
            jitter,
            measured_latency_us: measured_latency.as_micros() as u64,
        }
    }
}

/// Interarrival jitter estimator in stream samples, RFC 3550 style:
/// `J += (|D| - J) / 16` where D is the transit time difference between
/// consecutive packets.
#[derive(Debug, Default)]
pub struct JitterEstimator {
    last_transit: Option<i64>,
    jitter: f64,
}

impl JitterEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `arrival_samples` is the local clock at packet arrival, converted to
    /// samples of the packet encoding; `timestamp` is the packet's stream
    /// timestamp.
    pub fn update(&mut self, arrival_samples: u64, timestamp: u64) {
        let transit = arrival_samples as i64 - timestamp as i64;
        if let Some(last) = self.last_transit {
            let d = (transit - last).abs() as f64;
            self.jitter += (d - self.jitter) / 16.0;
        }
        self.last_transit = Some(transit);
    }

    pub fn jitter_samples(&self) -> u32 {
        self.jitter as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receiver_report_roundtrip() {
        let report = ReceiverReport {
            fraction_lost: 13,
            cumulative_lost: 1000,
            highest_seq: 0xCAFE_BABE,
            jitter: 441,
            measured_latency_us: 205_000,
        };

        let packet = ControlMessage::Receiver(report).into_packet(5, 0);
        assert_eq!(packet.kind, Substream::Control);

        let parsed = ControlMessage::parse(&packet.payload).unwrap();
        assert_eq!(parsed, ControlMessage::Receiver(report));
    }

    #[test]
    fn test_sender_report_roundtrip() {
        let report = SenderReport {
            stream_ts: 441_000,
            wallclock_us: 1_700_000_000_000_000,
            packet_count: 1000,
            byte_count: 1_280_000,
        };

        let packet = ControlMessage::Sender(report).into_packet(9, 441_000);
        let parsed = ControlMessage::parse(&packet.payload).unwrap();
        assert_eq!(parsed, ControlMessage::Sender(report));
    }

    #[test]
    fn test_parse_rejects_unknown_tag() {
        assert!(matches!(
            ControlMessage::parse(&[99, 0, 0]),
            Err(PacketError::UnknownKind(99))
        ));
    }

    #[test]
    fn test_parse_rejects_truncated() {
        let packet = ControlMessage::Sender(SenderReport {
            stream_ts: 0,
            wallclock_us: 0,
            packet_count: 0,
            byte_count: 0,
        })
        .into_packet(0, 0);

        let truncated = &packet.payload[..packet.payload.len() - 2];
        assert!(matches!(
            ControlMessage::parse(truncated),
            Err(PacketError::TooShort { .. })
        ));
    }

    #[test]
    fn test_report_builder_interval_loss() {
        let mut builder = ReportBuilder::new();

        // First interval: 100 expected, 90 received.
        let report = builder.build(100, 90, 99, 0, Duration::from_millis(200));
        assert_eq!(report.cumulative_lost, 10);
        assert_eq!(report.fraction_lost, (10 * 256 / 100) as u8);

        // Second interval: lossless. Fraction resets, cumulative stays.
        let report = builder.build(200, 190, 199, 0, Duration::from_millis(200));
        assert_eq!(report.fraction_lost, 0);
        assert_eq!(report.cumulative_lost, 10);
    }

    #[test]
    fn test_jitter_estimator_steady_stream_is_quiet() {
        let mut est = JitterEstimator::new();
        // Perfectly paced stream: transit constant, jitter stays zero.
        for i in 0..50u64 {
            est.update(1000 + i * 441, i * 441);
        }
        assert_eq!(est.jitter_samples(), 0);

        // A late packet bumps the estimate.
        est.update(1000 + 50 * 441 + 500, 50 * 441);
        assert!(est.jitter_samples() > 0);
    }
}
