//! # audio-link
//!
//! Real-time audio transport engine over UDP with forward error
//! correction, jitter buffering and adaptive latency control.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          SENDER                              │
//! │  host ──write_frame──▶ ┌───────────────┐                     │
//! │                        │ frame channel │                     │
//! │                        └───────┬───────┘                     │
//! │                                ▼                             │
//! │   ┌────────────┐   ┌────────────┐   ┌──────────────────┐    │
//! │   │ packetizer │──▶│ FEC block  │──▶│ UDP sockets       │    │
//! │   │ (packet::  │   │ encoder    │   │ media / repair /  │    │
//! │   │  codec)    │   │ (fec)      │   │ control (net)     │    │
//! │   └────────────┘   └────────────┘   └────────┬─────────┘    │
//! └────────────────────────────────────────────── │ ────────────┘
//!                                                 │  UDP
//! ┌────────────────────────────────────────────── │ ────────────┐
//! │                         RECEIVER               ▼             │
//! │   ┌──────────────────┐   ┌────────────┐   ┌────────────┐    │
//! │   │ UDP sockets       │──▶│ FEC block  │──▶│ jitter     │    │
//! │   │ media / repair /  │   │ assembler  │   │ buffer     │    │
//! │   │ control (net)     │   │ (fec)      │   │ (jitter)   │    │
//! │   └──────────────────┘   └────────────┘   └──────┬─────┘    │
//! │                                                   ▼          │
//! │            ┌───────────────┐              ┌─────────────┐    │
//! │            │ latency tuner │◀─occupancy──│frame channel │    │
//! │            │ (latency)     │              └──────┬──────┘    │
//! │            └───────────────┘                     ▼          │
//! │                                     host ◀──read_frame──    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! One worker thread per session; blocking sockets with short read
//! timeouts instead of an async runtime. Loss beyond FEC's reach is
//! surfaced as silent gap frames and statistics, never as errors.

pub mod config;
pub mod control;
pub mod error;
pub mod fec;
pub mod frame;
pub mod jitter;
pub mod latency;
pub mod net;
pub mod packet;
pub mod session;

pub use error::{Error, Result};

/// Engine-wide constants
pub mod constants {
    use std::time::Duration;

    /// Default sample rate of the default packet encoding
    pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Default audio duration per media packet
    pub const DEFAULT_PACKET_LENGTH: Duration = Duration::from_millis(5);

    /// Default end-to-end latency target
    pub const DEFAULT_TARGET_LATENCY: Duration = Duration::from_millis(200);

    /// Default UDP port for the media sub-stream
    pub const DEFAULT_MEDIA_PORT: u16 = crate::session::endpoint::DEFAULT_MEDIA_PORT;

    /// Default UDP port for the repair sub-stream
    pub const DEFAULT_REPAIR_PORT: u16 = crate::session::endpoint::DEFAULT_REPAIR_PORT;

    /// Default UDP port for the control sub-stream
    pub const DEFAULT_CONTROL_PORT: u16 = crate::session::endpoint::DEFAULT_CONTROL_PORT;

    /// Maximum datagram size (Ethernet MTU minus IP/UDP headers)
    pub const MAX_PACKET_SIZE: usize = crate::packet::MAX_PACKET_SIZE;
}
