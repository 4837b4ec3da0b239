//! Forward error correction
//!
//! Sender side groups media packets into blocks and emits repair packets;
//! receiver side reconstructs missing media packets from whatever subset
//! of source and repair packets arrived. Strictly forward: unrecoverable
//! loss is reported as a gap, never retransmitted.
//!
//! Two codes are provided. `ReedSolomon` is a systematic Vandermonde block
//! code over GF(256): any combination of up to `repair_count` lost source
//! packets per block is recoverable. `Staircase` is striped XOR parity
//! (repair `j` covers source indices congruent to `j` modulo
//! `repair_count`): cheaper, recovers one loss per stripe.

pub mod decoder;
pub mod encoder;
pub mod gf256;

pub use decoder::{BlockAssembler, FecStats};
pub use encoder::BlockEncoder;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Per-symbol prefix protecting packet metadata alongside the payload:
/// payload length (u16) and stream timestamp (u64).
pub(crate) const SYMBOL_PREFIX: usize = 10;

/// FEC scheme selector.
///
/// The string forms mirror the original module arguments
/// (`fec_encoding=disable|rs8m|ldpc`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FecScheme {
    /// Pass-through; the repair engine is never invoked
    #[default]
    Disable,
    /// Systematic Reed-Solomon style block code
    #[serde(rename = "rs8m")]
    ReedSolomon,
    /// Striped XOR parity
    #[serde(rename = "ldpc")]
    Staircase,
}

impl FecScheme {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, FecScheme::Disable)
    }
}

/// FEC block geometry configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FecConfig {
    pub scheme: FecScheme,
    /// Source packets per block
    pub source_count: u8,
    /// Repair packets per block
    pub repair_count: u8,
    /// How many blocks ahead of an unresolved block may arrive before it
    /// is declared stale and discarded (receiver side)
    pub lookahead_blocks: u32,
}

impl Default for FecConfig {
    fn default() -> Self {
        Self {
            scheme: FecScheme::Disable,
            source_count: 18,
            repair_count: 10,
            lookahead_blocks: 8,
        }
    }
}

impl FecConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.scheme.is_enabled() {
            return Ok(());
        }
        if self.source_count == 0 {
            return Err(ConfigError::OutOfRange {
                parameter: "fec_block_source_packets",
                value: 0,
                min: 1,
                max: 254,
            });
        }
        if self.repair_count == 0 {
            return Err(ConfigError::OutOfRange {
                parameter: "fec_block_repair_packets",
                value: 0,
                min: 1,
                max: 254,
            });
        }
        let total = self.source_count as i64 + self.repair_count as i64;
        if total > 255 {
            return Err(ConfigError::Incompatible {
                parameter: "fec_block_source_packets",
                reason: format!(
                    "source_count + repair_count = {} exceeds the 255-symbol block limit",
                    total
                ),
            });
        }
        if self.lookahead_blocks == 0 {
            return Err(ConfigError::OutOfRange {
                parameter: "fec_lookahead_blocks",
                value: 0,
                min: 1,
                max: i64::from(u32::MAX),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_config_always_valid() {
        let config = FecConfig {
            scheme: FecScheme::Disable,
            source_count: 0,
            repair_count: 0,
            lookahead_blocks: 0,
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_oversized_block() {
        let config = FecConfig {
            scheme: FecScheme::ReedSolomon,
            source_count: 200,
            repair_count: 100,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("255"));
    }

    #[test]
    fn test_rejects_zero_counts() {
        let config = FecConfig {
            scheme: FecScheme::ReedSolomon,
            source_count: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
