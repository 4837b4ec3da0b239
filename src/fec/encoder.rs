//! Sender-side FEC block encoder

use bytes::Bytes;

use crate::fec::{gf256, FecConfig, FecScheme, SYMBOL_PREFIX};
use crate::packet::{codec::FecGeometry, Packet, Substream};

/// Accumulates media packets into the current FEC block and emits repair
/// packets once the block is sealed.
///
/// Repair packets reuse the `seq` header field for the block's base media
/// sequence number, so the receiver can reconstruct the sequence numbers
/// of missing source packets even when an entire block's sources are lost.
pub struct BlockEncoder {
    config: FecConfig,
    next_block_seq: u32,
    pending: Vec<Packet>,
}

impl BlockEncoder {
    pub fn new(config: FecConfig) -> Self {
        Self {
            config,
            next_block_seq: 0,
            pending: Vec::with_capacity(config.source_count as usize),
        }
    }

    /// Accept one media packet for transmission.
    ///
    /// Returns the packets to put on the wire: the (geometry-annotated)
    /// source packet itself, followed by the block's repair packets if this
    /// packet sealed the block. With FEC disabled the packet passes through
    /// untouched.
    pub fn push(&mut self, mut packet: Packet) -> Vec<Packet> {
        if !self.config.scheme.is_enabled() {
            return vec![packet];
        }

        packet.fec = FecGeometry {
            block_seq: self.next_block_seq,
            index: self.pending.len() as u8,
            source_count: self.config.source_count,
            repair_count: self.config.repair_count,
        };
        self.pending.push(packet.clone());

        let mut out = vec![packet];
        if self.pending.len() == self.config.source_count as usize {
            out.extend(self.seal());
        }
        out
    }

    /// Explicit block boundary: seal the current block even if short.
    ///
    /// Repair packets of a short block carry the actual sealed source
    /// count; the receiver treats repair geometry as authoritative.
    pub fn flush(&mut self) -> Vec<Packet> {
        if !self.config.scheme.is_enabled() || self.pending.is_empty() {
            return Vec::new();
        }
        self.seal()
    }

    fn seal(&mut self) -> Vec<Packet> {
        let sources = std::mem::take(&mut self.pending);
        let block_seq = self.next_block_seq;
        self.next_block_seq = self.next_block_seq.wrapping_add(1);

        let k = sources.len();
        let m = self.config.repair_count as usize;
        let symbol_size = sources
            .iter()
            .map(|p| SYMBOL_PREFIX + p.payload.len())
            .max()
            .unwrap_or(SYMBOL_PREFIX);

        let symbols: Vec<Vec<u8>> = sources
            .iter()
            .map(|p| source_symbol(p, symbol_size))
            .collect();

        let repair_symbols = match self.config.scheme {
            FecScheme::ReedSolomon => {
                let rows = gf256::systematic_repair_rows(k, m);
                rows.iter()
                    .map(|row| {
                        let mut acc = vec![0u8; symbol_size];
                        for (coeff, symbol) in row.iter().zip(&symbols) {
                            gf256::mul_add_slice(&mut acc, symbol, *coeff);
                        }
                        acc
                    })
                    .collect::<Vec<_>>()
            }
            FecScheme::Staircase => (0..m)
                .map(|j| {
                    let mut acc = vec![0u8; symbol_size];
                    for (i, symbol) in symbols.iter().enumerate() {
                        if i % m == j {
                            gf256::mul_add_slice(&mut acc, symbol, 1);
                        }
                    }
                    acc
                })
                .collect(),
            FecScheme::Disable => unreachable!("seal is never reached with FEC disabled"),
        };

        let base = &sources[0];
        repair_symbols
            .into_iter()
            .enumerate()
            .map(|(j, symbol)| Packet {
                kind: Substream::Repair,
                encoding: base.encoding,
                // Base media sequence number of the protected block.
                seq: base.seq,
                timestamp: base.timestamp,
                fec: FecGeometry {
                    block_seq,
                    index: j as u8,
                    source_count: k as u8,
                    repair_count: m as u8,
                },
                payload: Bytes::from(symbol),
            })
            .collect()
    }
}

/// Symbol layout: payload length (u16 BE), stream timestamp (u64 BE),
/// payload bytes, zero padding up to the block symbol size.
pub(crate) fn source_symbol(packet: &Packet, symbol_size: usize) -> Vec<u8> {
    let mut symbol = vec![0u8; symbol_size];
    symbol[..2].copy_from_slice(&(packet.payload.len() as u16).to_be_bytes());
    symbol[2..SYMBOL_PREFIX].copy_from_slice(&packet.timestamp.to_be_bytes());
    symbol[SYMBOL_PREFIX..SYMBOL_PREFIX + packet.payload.len()].copy_from_slice(&packet.payload);
    symbol
}
