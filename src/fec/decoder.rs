//! Receiver-side FEC block assembler and reconstruction

use std::collections::BTreeMap;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::fec::encoder::source_symbol;
use crate::fec::{gf256, FecConfig, FecScheme, SYMBOL_PREFIX};
use crate::packet::{codec::FecGeometry, seq_unroll, Packet, Substream};

/// FEC reconstruction statistics
#[derive(Debug, Default, Clone)]
pub struct FecStats {
    /// Blocks fully delivered or reconstructed
    pub blocks_resolved: u64,
    /// Blocks discarded with unrecoverable loss
    pub blocks_failed: u64,
    /// Source packets rebuilt from repair data
    pub packets_recovered: u64,
    /// Source packets lost beyond repair (surfaced upward as gaps)
    pub gap_packets: u64,
    /// Packets arriving for blocks already discarded as stale
    pub late_packets: u64,
}

struct OpenBlock {
    /// Original wire block sequence number
    block_seq: u32,
    /// Media sequence number of source index 0
    base_seq: u32,
    encoding: u8,
    source_count: usize,
    repair_count: usize,
    /// Geometry confirmed by a repair packet (authoritative for short
    /// blocks sealed at an explicit boundary)
    authoritative: bool,
    sources: Vec<Option<Packet>>,
    repairs: Vec<Option<Packet>>,
    resolved: bool,
}

impl OpenBlock {
    fn new(packet: &Packet) -> Self {
        let geometry = packet.fec;
        let source_count = geometry.source_count as usize;
        let repair_count = geometry.repair_count as usize;
        let (base_seq, authoritative) = match packet.kind {
            // Repair packets carry the base media sequence directly.
            Substream::Repair => (packet.seq, true),
            _ => (packet.seq.wrapping_sub(geometry.index as u32), false),
        };
        Self {
            block_seq: geometry.block_seq,
            base_seq,
            encoding: packet.encoding,
            source_count,
            repair_count,
            authoritative,
            sources: vec![None; source_count],
            repairs: vec![None; repair_count],
            resolved: false,
        }
    }

    fn have_sources(&self) -> usize {
        self.sources.iter().filter(|s| s.is_some()).count()
    }

    fn have_repairs(&self) -> usize {
        self.repairs.iter().filter(|s| s.is_some()).count()
    }

    fn missing_sources(&self) -> usize {
        self.source_count - self.have_sources()
    }

    /// Drop held packets; the block stays in the map only as a tombstone.
    fn mark_resolved(&mut self) {
        self.resolved = true;
        self.sources.clear();
        self.repairs.clear();
    }

    /// Shrink to the sealed geometry reported by a repair packet.
    fn apply_repair_geometry(&mut self, geometry: &FecGeometry, base_seq: u32) {
        if self.authoritative {
            return;
        }
        self.authoritative = true;
        self.base_seq = base_seq;
        let sealed = geometry.source_count as usize;
        if sealed < self.source_count {
            self.sources.truncate(sealed);
            self.source_count = sealed;
        }
    }
}

/// Routes incoming media/repair packets into open FEC blocks and emits
/// reconstructed source packets.
///
/// Blocks are discarded once fully resolved, or once a block more than
/// `lookahead_blocks` ahead arrives (stale); stale unresolved blocks are
/// reported as gaps in [`FecStats`], never as errors.
pub struct BlockAssembler {
    config: FecConfig,
    /// Open blocks keyed by unrolled block sequence
    blocks: BTreeMap<u64, OpenBlock>,
    last_block: u64,
    started: bool,
    stats: FecStats,
}

impl BlockAssembler {
    pub fn new(config: FecConfig) -> Self {
        Self {
            config,
            blocks: BTreeMap::new(),
            last_block: 0,
            started: false,
            stats: FecStats::default(),
        }
    }

    pub fn stats(&self) -> FecStats {
        self.stats.clone()
    }

    /// Accept one received media or repair packet.
    ///
    /// Returns the packets to hand to the jitter buffer: the media packet
    /// itself (repair packets never leave the assembler), followed by any
    /// source packets reconstruction produced.
    pub fn push(&mut self, packet: Packet) -> Vec<Packet> {
        if !self.config.scheme.is_enabled() {
            return match packet.kind {
                Substream::Media => vec![packet],
                _ => Vec::new(),
            };
        }

        if !self.started {
            self.started = true;
            self.last_block = packet.fec.block_seq as u64;
        }
        let unrolled = seq_unroll(self.last_block, packet.fec.block_seq);

        // Arrival for a block already evicted as stale.
        if unrolled + u64::from(self.config.lookahead_blocks) < self.last_block {
            self.stats.late_packets += 1;
            return match packet.kind {
                // Late media is still audio; the jitter buffer decides.
                Substream::Media => vec![packet],
                _ => Vec::new(),
            };
        }
        if unrolled > self.last_block {
            self.last_block = unrolled;
        }

        let block = self
            .blocks
            .entry(unrolled)
            .or_insert_with(|| OpenBlock::new(&packet));

        let mut out = Vec::new();
        match packet.kind {
            Substream::Media => {
                out.push(packet.clone());
                let index = packet.fec.index as usize;
                if !block.resolved && index < block.source_count {
                    block.sources[index].get_or_insert(packet);
                }
            }
            Substream::Repair => {
                block.apply_repair_geometry(&packet.fec, packet.seq);
                let index = packet.fec.index as usize;
                if !block.resolved && index < block.repair_count {
                    block.repairs[index].get_or_insert(packet);
                }
            }
            Substream::Control => return out,
        }

        out.extend(Self::try_resolve(
            block,
            self.config.scheme,
            &mut self.stats,
        ));

        self.evict_stale();
        out
    }

    /// Resolved blocks are kept (emptied) until eviction so that late
    /// duplicates do not re-open them and distort the gap statistics.
    fn evict_stale(&mut self) {
        let horizon = self
            .last_block
            .saturating_sub(self.config.lookahead_blocks as u64);
        while let Some((&key, _)) = self.blocks.first_key_value() {
            if key >= horizon {
                break;
            }
            let block = self.blocks.remove(&key).unwrap_or_else(|| unreachable!());
            if block.resolved {
                continue;
            }
            let missing = block.missing_sources();
            self.stats.blocks_failed += 1;
            self.stats.gap_packets += missing as u64;
            debug!(
                block_seq = block.block_seq,
                missing, "discarding stale block with unrecoverable loss"
            );
        }
    }

    fn try_resolve(block: &mut OpenBlock, scheme: FecScheme, stats: &mut FecStats) -> Vec<Packet> {
        if block.resolved {
            return Vec::new();
        }
        if block.missing_sources() == 0 {
            block.mark_resolved();
            stats.blocks_resolved += 1;
            return Vec::new();
        }
        if block.have_sources() + block.have_repairs() < block.source_count {
            return Vec::new();
        }

        let recovered = match scheme {
            FecScheme::ReedSolomon => Self::reconstruct_reed_solomon(block),
            FecScheme::Staircase => Self::reconstruct_staircase(block),
            FecScheme::Disable => unreachable!("assembler is bypassed with FEC disabled"),
        };

        stats.packets_recovered += recovered.len() as u64;
        if block.missing_sources() == 0 {
            block.mark_resolved();
            stats.blocks_resolved += 1;
            trace!(
                block_seq = block.block_seq,
                recovered = recovered.len(),
                "block reconstructed"
            );
        }
        recovered
    }

    fn reconstruct_reed_solomon(block: &mut OpenBlock) -> Vec<Packet> {
        let k = block.source_count;
        let symbol_size = match block.repairs.iter().flatten().next() {
            Some(repair) => repair.payload.len(),
            None => return Vec::new(),
        };
        if symbol_size < SYMBOL_PREFIX {
            return Vec::new();
        }

        let repair_rows = gf256::systematic_repair_rows(k, block.repair_count);

        // Select k received rows: every present source, then repairs.
        let mut matrix = Vec::with_capacity(k * k);
        let mut symbols: Vec<Vec<u8>> = Vec::with_capacity(k);
        for (i, slot) in block.sources.iter().enumerate() {
            if let Some(p) = slot {
                let mut row = vec![0u8; k];
                row[i] = 1;
                matrix.extend_from_slice(&row);
                symbols.push(source_symbol(p, symbol_size));
            }
        }
        for (j, slot) in block.repairs.iter().enumerate() {
            if symbols.len() == k {
                break;
            }
            if let Some(p) = slot {
                if p.payload.len() != symbol_size {
                    continue;
                }
                matrix.extend_from_slice(&repair_rows[j]);
                symbols.push(p.payload.to_vec());
            }
        }
        if symbols.len() < k {
            return Vec::new();
        }

        let Some(inverse) = gf256::invert_matrix(&mut matrix, k) else {
            // Cannot happen for an MDS code; treat as unrecoverable.
            return Vec::new();
        };

        let mut recovered = Vec::new();
        for i in 0..k {
            if block.sources[i].is_some() {
                continue;
            }
            let mut symbol = vec![0u8; symbol_size];
            for (t, received) in symbols.iter().enumerate() {
                gf256::mul_add_slice(&mut symbol, received, inverse[i * k + t]);
            }
            if let Some(packet) = block_packet_from_symbol(block, i, &symbol) {
                block.sources[i] = Some(packet.clone());
                recovered.push(packet);
            }
        }
        recovered
    }

    fn reconstruct_staircase(block: &mut OpenBlock) -> Vec<Packet> {
        let m = block.repair_count;
        let mut recovered = Vec::new();

        for j in 0..m {
            let Some(repair) = block.repairs[j].clone() else {
                continue;
            };
            let symbol_size = repair.payload.len();
            if symbol_size < SYMBOL_PREFIX {
                continue;
            }

            let stripe: Vec<usize> = (0..block.source_count).filter(|i| i % m == j).collect();
            let missing: Vec<usize> = stripe
                .iter()
                .copied()
                .filter(|&i| block.sources[i].is_none())
                .collect();
            // Striped parity recovers exactly one loss per stripe.
            if missing.len() != 1 {
                continue;
            }

            let mut symbol = repair.payload.to_vec();
            for &i in &stripe {
                if let Some(p) = &block.sources[i] {
                    gf256::mul_add_slice(&mut symbol, &source_symbol(p, symbol_size), 1);
                }
            }
            if let Some(packet) = block_packet_from_symbol(block, missing[0], &symbol) {
                block.sources[missing[0]] = Some(packet.clone());
                recovered.push(packet);
            }
        }
        recovered
    }
}

/// Rebuild a media packet from a reconstructed symbol.
fn block_packet_from_symbol(block: &OpenBlock, index: usize, symbol: &[u8]) -> Option<Packet> {
    let len = u16::from_be_bytes([symbol[0], symbol[1]]) as usize;
    if SYMBOL_PREFIX + len > symbol.len() {
        // Corrupt symbol; count the slot as lost rather than crash.
        return None;
    }
    let mut ts_bytes = [0u8; 8];
    ts_bytes.copy_from_slice(&symbol[2..SYMBOL_PREFIX]);

    Some(Packet {
        kind: Substream::Media,
        encoding: block.encoding,
        seq: block.base_seq.wrapping_add(index as u32),
        timestamp: u64::from_be_bytes(ts_bytes),
        fec: FecGeometry {
            block_seq: block.block_seq,
            index: index as u8,
            source_count: block.source_count as u8,
            repair_count: block.repair_count as u8,
        },
        payload: Bytes::copy_from_slice(&symbol[SYMBOL_PREFIX..SYMBOL_PREFIX + len]),
    })
}
