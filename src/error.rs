//! Error types for the audio transport engine

use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("Timing fault: {0}")]
    Timing(#[from] TimingFault),

    #[error("Session is closed")]
    SessionClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors, detected before any socket is opened.
///
/// Every variant names the failing parameter so operators can correct
/// their arguments without digging through logs.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for `{parameter}`: {reason}")]
    InvalidValue {
        parameter: &'static str,
        reason: String,
    },

    #[error("`{parameter}` = {value} is out of range [{min}, {max}]")]
    OutOfRange {
        parameter: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("incompatible settings for `{parameter}`: {reason}")]
    Incompatible {
        parameter: &'static str,
        reason: String,
    },

    #[error("missing endpoint for {substream} sub-stream")]
    MissingEndpoint { substream: &'static str },

    #[error("remote host is mandatory for sender endpoints (`{parameter}` is empty)")]
    MissingHost { parameter: &'static str },
}

/// Socket setup errors. Transient send/receive failures on an open
/// session are counted in session stats instead.
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed on {addr}: {source}")]
    BindFailed {
        addr: String,
        source: std::io::Error,
    },

    #[error("Socket connect failed to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        source: std::io::Error,
    },
}

/// Packet codec errors
#[derive(Error, Debug)]
pub enum PacketError {
    #[error("packet too short: need {required} bytes, have {available}")]
    TooShort { required: usize, available: usize },

    #[error("bad magic byte 0x{0:02x}")]
    BadMagic(u8),

    #[error("unsupported wire format version {0}")]
    UnsupportedVersion(u8),

    #[error("unknown sub-stream kind {0}")]
    UnknownKind(u8),

    #[error("declared payload length {declared} exceeds available {available} bytes")]
    PayloadLength { declared: usize, available: usize },

    #[error("payload of {0} bytes exceeds maximum packet size")]
    PayloadTooLarge(usize),

    #[error("unknown packet encoding id {0}")]
    UnknownEncoding(u8),

    #[error("payload length {0} is not a whole number of samples")]
    PartialSample(usize),
}

/// Observable playback timing faults.
///
/// These are reported to the host, which decides whether to tear the
/// session down. The engine never terminates itself on a timing fault.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingFault {
    #[error("no playback for {elapsed_ms} ms (timeout {timeout_ms} ms)")]
    NoPlayback { elapsed_ms: u64, timeout_ms: u64 },

    #[error("choppy playback for {elapsed_ms} ms (timeout {timeout_ms} ms)")]
    ChoppyPlayback { elapsed_ms: u64, timeout_ms: u64 },
}

/// Result type alias for the engine
pub type Result<T> = std::result::Result<T, Error>;
