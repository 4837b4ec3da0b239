//! Packet serialization and PCM payload packing
//!
//! Every datagram starts with a fixed 25-byte header:
//!
//! ```text
//! 0      magic        u8   always 0xA7
//! 1      version      u8   always 1
//! 2      kind         u8   0 media, 1 repair, 2 control
//! 3      encoding     u8   packet encoding id (0 for control)
//! 4..8   seq          u32  per-sub-stream sequence number
//! 8..16  timestamp    u64  stream clock, in samples of the packet encoding
//! 16..20 block_seq    u32  FEC block sequence number (0 without FEC)
//! 20     index        u8   position within the FEC block
//! 21     source_count u8   FEC block geometry (0 without FEC)
//! 22     repair_count u8
//! 23..25 payload_len  u16
//! ```
//!
//! All integers are big-endian. Anything that does not start with the magic
//! byte is foreign traffic and is rejected before further parsing.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::PacketError;
use crate::frame::SampleFormat;
use crate::packet::Substream;

/// First byte of every engine datagram
pub const MAGIC: u8 = 0xA7;

/// Current wire format version
pub const VERSION: u8 = 1;

/// Fixed header size in bytes
pub const HEADER_SIZE: usize = 25;

/// Maximum datagram size (Ethernet MTU minus IP/UDP headers)
pub const MAX_PACKET_SIZE: usize = 1472;

/// FEC geometry fields for packets outside any FEC block
pub const FEC_GEOMETRY_NONE: FecGeometry = FecGeometry {
    block_seq: 0,
    index: 0,
    source_count: 0,
    repair_count: 0,
};

/// Position of a packet within its FEC block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FecGeometry {
    /// Block sequence number, shared by all packets of one block
    pub block_seq: u32,
    /// Index within the block: source packets 0..source_count,
    /// repair packets 0..repair_count
    pub index: u8,
    pub source_count: u8,
    pub repair_count: u8,
}

/// An immutable network packet.
///
/// Ownership moves from the codec to the session manager and out to the
/// socket; payloads are reference-counted so FEC can hold block copies
/// without reallocating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: Substream,
    pub encoding: u8,
    pub seq: u32,
    pub timestamp: u64,
    pub fec: FecGeometry,
    pub payload: Bytes,
}

impl Packet {
    /// Serialize into a datagram buffer.
    pub fn to_bytes(&self) -> Result<Bytes, PacketError> {
        if self.payload.len() > MAX_PACKET_SIZE - HEADER_SIZE {
            return Err(PacketError::PayloadTooLarge(self.payload.len()));
        }

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_u8(MAGIC);
        buf.put_u8(VERSION);
        buf.put_u8(self.kind.wire_kind());
        buf.put_u8(self.encoding);
        buf.put_u32(self.seq);
        buf.put_u64(self.timestamp);
        buf.put_u32(self.fec.block_seq);
        buf.put_u8(self.fec.index);
        buf.put_u8(self.fec.source_count);
        buf.put_u8(self.fec.repair_count);
        buf.put_u16(self.payload.len() as u16);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Parse a received datagram.
    ///
    /// Malformed input (wrong magic, version, kind, or a payload length that
    /// disagrees with the datagram) is an error, never a panic.
    pub fn parse(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < HEADER_SIZE {
            return Err(PacketError::TooShort {
                required: HEADER_SIZE,
                available: data.len(),
            });
        }

        let mut buf = data;
        let magic = buf.get_u8();
        if magic != MAGIC {
            return Err(PacketError::BadMagic(magic));
        }
        let version = buf.get_u8();
        if version != VERSION {
            return Err(PacketError::UnsupportedVersion(version));
        }
        let kind_byte = buf.get_u8();
        let kind = Substream::from_wire_kind(kind_byte)
            .ok_or(PacketError::UnknownKind(kind_byte))?;
        let encoding = buf.get_u8();
        let seq = buf.get_u32();
        let timestamp = buf.get_u64();
        let block_seq = buf.get_u32();
        let index = buf.get_u8();
        let source_count = buf.get_u8();
        let repair_count = buf.get_u8();
        let payload_len = buf.get_u16() as usize;

        if payload_len != buf.remaining() {
            return Err(PacketError::PayloadLength {
                declared: payload_len,
                available: buf.remaining(),
            });
        }

        Ok(Self {
            kind,
            encoding,
            seq,
            timestamp,
            fec: FecGeometry {
                block_seq,
                index,
                source_count,
                repair_count,
            },
            payload: Bytes::copy_from_slice(buf),
        })
    }
}

/// A packet encoding: how PCM samples are laid out in media payloads.
///
/// Id 10 matches RTP payload type 10 (L16 stereo at 44100 Hz), the
/// default. Custom encodings can be registered per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketEncoding {
    pub id: u8,
    pub sample_rate: u32,
    pub format: SampleFormat,
    pub channels: u16,
}

impl PacketEncoding {
    /// L16 stereo 44100 Hz, the default packet encoding
    pub const L16_STEREO: PacketEncoding = PacketEncoding {
        id: 10,
        sample_rate: 44100,
        format: SampleFormat::S16,
        channels: 2,
    };

    /// Bytes per single (mono) sample on the wire
    pub fn sample_size(&self) -> usize {
        match self.format {
            SampleFormat::S16 => 2,
            SampleFormat::F32 => 4,
        }
    }

}

/// Encodes frame slices into media packets and back.
pub struct PacketCodec {
    encoding: PacketEncoding,
}

impl PacketCodec {
    pub fn new(encoding: PacketEncoding) -> Self {
        Self { encoding }
    }

    pub fn encoding(&self) -> &PacketEncoding {
        &self.encoding
    }

    /// Encode a slice of interleaved f32 samples into one media packet.
    ///
    /// `timestamp` is the stream position, in samples per channel, of the
    /// first sample in the slice.
    pub fn encode(
        &self,
        samples: &[f32],
        seq: u32,
        timestamp: u64,
    ) -> Result<Packet, PacketError> {
        let byte_len = samples.len() * self.encoding.sample_size();
        if byte_len > MAX_PACKET_SIZE - HEADER_SIZE {
            return Err(PacketError::PayloadTooLarge(byte_len));
        }

        let mut payload = BytesMut::with_capacity(byte_len);
        match self.encoding.format {
            SampleFormat::S16 => {
                for &s in samples {
                    let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                    payload.put_i16(v);
                }
            }
            SampleFormat::F32 => {
                for &s in samples {
                    payload.put_u32(s.to_bits());
                }
            }
        }

        Ok(Packet {
            kind: Substream::Media,
            encoding: self.encoding.id,
            seq,
            timestamp,
            fec: FEC_GEOMETRY_NONE,
            payload: payload.freeze(),
        })
    }

    /// Decode a media packet payload back to interleaved f32 samples.
    pub fn decode(&self, packet: &Packet) -> Result<(u32, u64, Vec<f32>), PacketError> {
        if packet.encoding != self.encoding.id {
            return Err(PacketError::UnknownEncoding(packet.encoding));
        }

        let sample_size = self.encoding.sample_size();
        if packet.payload.len() % sample_size != 0 {
            return Err(PacketError::PartialSample(packet.payload.len()));
        }

        let count = packet.payload.len() / sample_size;
        let mut samples = Vec::with_capacity(count);
        let mut buf = packet.payload.clone();
        match self.encoding.format {
            SampleFormat::S16 => {
                for _ in 0..count {
                    samples.push(buf.get_i16() as f32 / i16::MAX as f32);
                }
            }
            SampleFormat::F32 => {
                for _ in 0..count {
                    samples.push(f32::from_bits(buf.get_u32()));
                }
            }
        }

        Ok((packet.seq, packet.timestamp, samples))
    }

    /// Duration of a media packet in samples per channel.
    pub fn packet_duration(&self, packet: &Packet) -> u64 {
        let per_frame = self.encoding.sample_size() * self.encoding.channels as usize;
        if per_frame == 0 {
            return 0;
        }
        (packet.payload.len() / per_frame) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_encoding() -> PacketEncoding {
        PacketEncoding {
            id: 77,
            sample_rate: 48000,
            format: SampleFormat::F32,
            channels: 2,
        }
    }

    #[test]
    fn test_header_roundtrip() {
        let packet = Packet {
            kind: Substream::Repair,
            encoding: 10,
            seq: 0xDEADBEEF,
            timestamp: 0x0123_4567_89AB_CDEF,
            fec: FecGeometry {
                block_seq: 42,
                index: 3,
                source_count: 8,
                repair_count: 4,
            },
            payload: Bytes::from_static(&[1, 2, 3, 4]),
        };

        let bytes = packet.to_bytes().unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 4);
        assert_eq!(Packet::parse(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_pcm_roundtrip_f32() {
        let codec = PacketCodec::new(f32_encoding());
        let samples: Vec<f32> = (0..240).map(|i| (i as f32 / 240.0) - 0.5).collect();

        let packet = codec.encode(&samples, 7, 1000).unwrap();
        let (seq, ts, decoded) = codec.decode(&packet).unwrap();

        assert_eq!(seq, 7);
        assert_eq!(ts, 1000);
        assert_eq!(decoded, samples);
        assert_eq!(codec.packet_duration(&packet), 120);
    }

    #[test]
    fn test_pcm_roundtrip_s16() {
        let codec = PacketCodec::new(PacketEncoding::L16_STEREO);
        let samples: Vec<f32> = vec![0.0, 0.5, -0.5, 1.0, -1.0, 0.25];

        let packet = codec.encode(&samples, 1, 0).unwrap();
        let (_, _, decoded) = codec.decode(&packet).unwrap();

        assert_eq!(decoded.len(), samples.len());
        for (a, b) in samples.iter().zip(&decoded) {
            // s16 quantization error
            assert!((a - b).abs() < 1.0 / 16384.0, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_reject_bad_magic() {
        let codec = PacketCodec::new(PacketEncoding::L16_STEREO);
        let packet = codec.encode(&[0.0; 4], 0, 0).unwrap();
        let mut bytes = packet.to_bytes().unwrap().to_vec();
        bytes[0] = 0x55;

        assert!(matches!(
            Packet::parse(&bytes),
            Err(PacketError::BadMagic(0x55))
        ));
    }

    #[test]
    fn test_reject_bad_version() {
        let codec = PacketCodec::new(PacketEncoding::L16_STEREO);
        let mut bytes = codec.encode(&[0.0; 4], 0, 0).unwrap().to_bytes().unwrap().to_vec();
        bytes[1] = 9;

        assert!(matches!(
            Packet::parse(&bytes),
            Err(PacketError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn test_reject_truncated() {
        assert!(matches!(
            Packet::parse(&[MAGIC, VERSION, 0]),
            Err(PacketError::TooShort { .. })
        ));
    }

    #[test]
    fn test_reject_length_mismatch() {
        let codec = PacketCodec::new(PacketEncoding::L16_STEREO);
        let mut bytes = codec.encode(&[0.0; 8], 0, 0).unwrap().to_bytes().unwrap().to_vec();
        // Chop off half the payload; the declared length no longer matches.
        bytes.truncate(bytes.len() - 8);

        assert!(matches!(
            Packet::parse(&bytes),
            Err(PacketError::PayloadLength { .. })
        ));
    }

    #[test]
    fn test_reject_oversized_payload() {
        let codec = PacketCodec::new(f32_encoding());
        let samples = vec![0.0f32; MAX_PACKET_SIZE];
        assert!(matches!(
            codec.encode(&samples, 0, 0),
            Err(PacketError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn test_decode_wrong_encoding() {
        let codec = PacketCodec::new(PacketEncoding::L16_STEREO);
        let other = PacketCodec::new(f32_encoding());
        let packet = other.encode(&[0.0; 4], 0, 0).unwrap();

        assert!(matches!(
            codec.decode(&packet),
            Err(PacketError::UnknownEncoding(77))
        ));
    }
}
