//! Session configuration
//!
//! Plain serde structs with documented defaults. Sessions validate their
//! whole configuration before opening any socket, and every rejection
//! names the failing parameter.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Error, Result};
use crate::fec::{FecConfig, SYMBOL_PREFIX};
use crate::frame::SampleFormat;
use crate::latency::LatencyConfig;
use crate::packet::{PacketEncoding, Substream, HEADER_SIZE, MAX_PACKET_SIZE};
use crate::session::endpoint::{Endpoint, EndpointProtocol};

/// Stream format and packetization parameters, shared by both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Packet encoding id carried in every media header (default 10,
    /// L16 stereo 44100 Hz)
    pub encoding_id: u8,
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    /// Duration of audio carried by one media packet (default 5 ms; a
    /// stereo 16-bit 44100 Hz packet must fit in a single datagram)
    pub packet_length: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            encoding_id: PacketEncoding::L16_STEREO.id,
            sample_rate: PacketEncoding::L16_STEREO.sample_rate,
            channels: PacketEncoding::L16_STEREO.channels,
            format: SampleFormat::S16,
            packet_length: Duration::from_millis(5),
        }
    }
}

impl StreamConfig {
    pub fn packet_encoding(&self) -> PacketEncoding {
        PacketEncoding {
            id: self.encoding_id,
            sample_rate: self.sample_rate,
            format: self.format,
            channels: self.channels,
        }
    }

    /// Samples per channel carried by one media packet.
    pub fn samples_per_packet(&self) -> usize {
        (self.packet_length.as_micros() as u64 * self.sample_rate as u64 / 1_000_000) as usize
    }

    /// Media payload byte budget. Leaves room for the per-symbol prefix so
    /// repair packets built over full payloads still fit in one datagram.
    pub fn max_payload(&self) -> usize {
        MAX_PACKET_SIZE - HEADER_SIZE - SYMBOL_PREFIX
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !(8000..=192_000).contains(&self.sample_rate) {
            return Err(ConfigError::OutOfRange {
                parameter: "sample_rate",
                value: self.sample_rate as i64,
                min: 8000,
                max: 192_000,
            });
        }
        if self.channels == 0 || self.channels > 8 {
            return Err(ConfigError::OutOfRange {
                parameter: "channels",
                value: self.channels as i64,
                min: 1,
                max: 8,
            });
        }
        let length_ms = self.packet_length.as_millis() as i64;
        if !(1..=100).contains(&length_ms) {
            return Err(ConfigError::OutOfRange {
                parameter: "packet_length_msec",
                value: length_ms,
                min: 1,
                max: 100,
            });
        }

        let encoding = self.packet_encoding();
        let bytes = self.samples_per_packet() * self.channels as usize * encoding.sample_size();
        if bytes > self.max_payload() {
            return Err(ConfigError::Incompatible {
                parameter: "packet_length_msec",
                reason: format!(
                    "{} ms of audio needs {} payload bytes, more than fits in one datagram",
                    length_ms, bytes
                ),
            });
        }
        Ok(())
    }
}

/// Sender session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderConfig {
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub fec: FecConfig,
    pub media: Endpoint,
    /// Required when FEC is enabled
    pub repair: Option<Endpoint>,
    pub control: Option<Endpoint>,
}

impl SenderConfig {
    /// Start from stream and FEC parameters with no endpoints attached.
    pub fn new(stream: StreamConfig, fec: FecConfig) -> std::result::Result<Self, ConfigError> {
        let protocol = EndpointProtocol::for_substream(Substream::Media, fec.scheme)?;
        Ok(Self {
            stream,
            fec,
            media: Endpoint::with_default_port(protocol, ""),
            repair: None,
            control: None,
        })
    }

    /// Attach the remote endpoint of one sub-stream.
    ///
    /// The endpoint protocol is derived from the sub-stream kind and the
    /// FEC scheme; an incompatible combination (a repair endpoint while
    /// FEC is disabled) is rejected here, before any socket is opened.
    pub fn connect(
        mut self,
        kind: Substream,
        host: impl Into<String>,
        port: u16,
    ) -> std::result::Result<Self, ConfigError> {
        let protocol = EndpointProtocol::for_substream(kind, self.fec.scheme)?;
        let endpoint = Endpoint::new(protocol, host, port);
        match kind {
            Substream::Media => self.media = endpoint,
            Substream::Repair => self.repair = Some(endpoint),
            Substream::Control => self.control = Some(endpoint),
        }
        Ok(self)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.stream.validate()?;
        self.fec.validate()?;
        self.media.validate_for_scheme(self.fec.scheme)?;
        self.media.connect_addr()?;

        if self.fec.scheme.is_enabled() {
            let repair = self.repair.as_ref().ok_or(ConfigError::MissingEndpoint {
                substream: "repair",
            })?;
            repair.validate_for_scheme(self.fec.scheme)?;
            repair.connect_addr()?;
        } else if self.repair.is_some() {
            return Err(ConfigError::Incompatible {
                parameter: "fec_encoding",
                reason: "repair endpoint configured but FEC is disabled".into(),
            });
        }

        if let Some(control) = &self.control {
            control.connect_addr()?;
        }
        Ok(())
    }
}

/// Receiver session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub fec: FecConfig,
    #[serde(default)]
    pub latency: LatencyConfig,
    pub media: Endpoint,
    pub repair: Option<Endpoint>,
    pub control: Option<Endpoint>,
    /// Report a fault after this much continuous silence (default 2 s)
    #[serde(default = "default_playback_timeout")]
    pub no_playback_timeout: Duration,
    /// Report a fault after this much continuous gap activity (default 2 s)
    #[serde(default = "default_playback_timeout")]
    pub choppy_playback_timeout: Duration,
}

fn default_playback_timeout() -> Duration {
    Duration::from_secs(2)
}

impl ReceiverConfig {
    /// Start from stream, FEC and latency parameters, listening on the
    /// wildcard address and the default media port.
    pub fn new(
        stream: StreamConfig,
        fec: FecConfig,
        latency: LatencyConfig,
    ) -> std::result::Result<Self, ConfigError> {
        let protocol = EndpointProtocol::for_substream(Substream::Media, fec.scheme)?;
        Ok(Self {
            stream,
            fec,
            latency,
            media: Endpoint::with_default_port(protocol, ""),
            repair: None,
            control: None,
            no_playback_timeout: default_playback_timeout(),
            choppy_playback_timeout: default_playback_timeout(),
        })
    }

    /// Attach the local endpoint of one sub-stream. An empty host binds
    /// the wildcard address.
    pub fn bind(
        mut self,
        kind: Substream,
        host: impl Into<String>,
        port: u16,
    ) -> std::result::Result<Self, ConfigError> {
        let protocol = EndpointProtocol::for_substream(kind, self.fec.scheme)?;
        let endpoint = Endpoint::new(protocol, host, port);
        match kind {
            Substream::Media => self.media = endpoint,
            Substream::Repair => self.repair = Some(endpoint),
            Substream::Control => self.control = Some(endpoint),
        }
        Ok(self)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.stream.validate()?;
        self.fec.validate()?;
        self.latency.validate()?;
        self.media.validate_for_scheme(self.fec.scheme)?;
        self.media.bind_addr()?;

        if self.fec.scheme.is_enabled() {
            let repair = self.repair.as_ref().ok_or(ConfigError::MissingEndpoint {
                substream: "repair",
            })?;
            repair.validate_for_scheme(self.fec.scheme)?;
            repair.bind_addr()?;
        }

        if let Some(control) = &self.control {
            control.bind_addr()?;
        }
        Ok(())
    }
}

/// Load a TOML configuration file.
pub fn load<T: serde::de::DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let text = std::fs::read_to_string(path)?;
    toml::from_str(&text).map_err(|e| {
        Error::Config(ConfigError::InvalidValue {
            parameter: "config_file",
            reason: e.to_string(),
        })
    })
}

/// Save a TOML configuration file.
pub fn save<T: Serialize>(path: impl AsRef<Path>, config: &T) -> Result<()> {
    let text = toml::to_string_pretty(config).map_err(|e| {
        Error::Config(ConfigError::InvalidValue {
            parameter: "config_file",
            reason: e.to_string(),
        })
    })?;
    std::fs::write(path, text)?;
    Ok(())
}
