//! Network packet model: wire format, sequencing, PCM payload codec

pub mod codec;
pub mod seq;

pub use codec::{
    FecGeometry, Packet, PacketCodec, PacketEncoding, FEC_GEOMETRY_NONE, HEADER_SIZE,
    MAX_PACKET_SIZE,
};
pub use seq::{seq_diff, seq_le, seq_lt, seq_unroll};

/// Logical sub-stream a packet belongs to.
///
/// Each sub-stream has its own socket, endpoint and sequence space.
/// Cross-sub-stream ordering is never guaranteed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Substream {
    /// Source audio packets
    Media,
    /// FEC repair packets (only when FEC is enabled)
    Repair,
    /// Timing/loss statistics exchange
    Control,
}

impl Substream {
    pub fn name(&self) -> &'static str {
        match self {
            Substream::Media => "media",
            Substream::Repair => "repair",
            Substream::Control => "control",
        }
    }

    pub(crate) fn wire_kind(&self) -> u8 {
        match self {
            Substream::Media => 0,
            Substream::Repair => 1,
            Substream::Control => 2,
        }
    }

    pub(crate) fn from_wire_kind(kind: u8) -> Option<Self> {
        match kind {
            0 => Some(Substream::Media),
            1 => Some(Substream::Repair),
            2 => Some(Substream::Control),
            _ => None,
        }
    }
}

impl std::fmt::Display for Substream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
