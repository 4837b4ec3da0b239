//! Endpoint addressing and protocol validation
//!
//! An endpoint binds one sub-stream to a transport protocol and a network
//! address. The protocol encodes the FEC scheme, so a mismatch between the
//! endpoint set and the session's FEC configuration is a configuration
//! error caught before any socket is opened.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::fec::FecScheme;
use crate::packet::Substream;

pub const DEFAULT_MEDIA_PORT: u16 = 10001;
pub const DEFAULT_REPAIR_PORT: u16 = 10002;
pub const DEFAULT_CONTROL_PORT: u16 = 10003;

/// Transport protocol of one endpoint.
///
/// The string forms mirror the original endpoint URIs
/// (`rtp://`, `rtp+rs8m://`, `rs8m://`, `rtp+ldpc://`, `ldpc://`,
/// `rtcp://`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointProtocol {
    /// Bare media, no FEC
    #[serde(rename = "rtp")]
    Rtp,
    /// Media protected by the Reed-Solomon scheme
    #[serde(rename = "rtp+rs8m")]
    RtpRs8mSource,
    /// Reed-Solomon repair sub-stream
    #[serde(rename = "rs8m")]
    Rs8mRepair,
    /// Media protected by the staircase scheme
    #[serde(rename = "rtp+ldpc")]
    RtpLdpcSource,
    /// Staircase repair sub-stream
    #[serde(rename = "ldpc")]
    LdpcRepair,
    /// Control channel
    #[serde(rename = "rtcp")]
    Rtcp,
}

impl EndpointProtocol {
    /// Protocol implied by a sub-stream under a given FEC scheme.
    pub fn for_substream(kind: Substream, scheme: FecScheme) -> Result<Self, ConfigError> {
        match (kind, scheme) {
            (Substream::Media, FecScheme::Disable) => Ok(EndpointProtocol::Rtp),
            (Substream::Media, FecScheme::ReedSolomon) => Ok(EndpointProtocol::RtpRs8mSource),
            (Substream::Media, FecScheme::Staircase) => Ok(EndpointProtocol::RtpLdpcSource),
            (Substream::Repair, FecScheme::ReedSolomon) => Ok(EndpointProtocol::Rs8mRepair),
            (Substream::Repair, FecScheme::Staircase) => Ok(EndpointProtocol::LdpcRepair),
            (Substream::Repair, FecScheme::Disable) => Err(ConfigError::Incompatible {
                parameter: "fec_encoding",
                reason: "repair endpoint configured but FEC is disabled".into(),
            }),
            (Substream::Control, _) => Ok(EndpointProtocol::Rtcp),
        }
    }

    pub fn substream(&self) -> Substream {
        match self {
            EndpointProtocol::Rtp
            | EndpointProtocol::RtpRs8mSource
            | EndpointProtocol::RtpLdpcSource => Substream::Media,
            EndpointProtocol::Rs8mRepair | EndpointProtocol::LdpcRepair => Substream::Repair,
            EndpointProtocol::Rtcp => Substream::Control,
        }
    }

    /// FEC scheme this protocol commits to, if any.
    pub fn fec_scheme(&self) -> Option<FecScheme> {
        match self {
            EndpointProtocol::Rtp => Some(FecScheme::Disable),
            EndpointProtocol::RtpRs8mSource | EndpointProtocol::Rs8mRepair => {
                Some(FecScheme::ReedSolomon)
            }
            EndpointProtocol::RtpLdpcSource | EndpointProtocol::LdpcRepair => {
                Some(FecScheme::Staircase)
            }
            EndpointProtocol::Rtcp => None,
        }
    }

    pub fn default_port(&self) -> u16 {
        match self.substream() {
            Substream::Media => DEFAULT_MEDIA_PORT,
            Substream::Repair => DEFAULT_REPAIR_PORT,
            Substream::Control => DEFAULT_CONTROL_PORT,
        }
    }
}

impl fmt::Display for EndpointProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EndpointProtocol::Rtp => "rtp",
            EndpointProtocol::RtpRs8mSource => "rtp+rs8m",
            EndpointProtocol::Rs8mRepair => "rs8m",
            EndpointProtocol::RtpLdpcSource => "rtp+ldpc",
            EndpointProtocol::LdpcRepair => "ldpc",
            EndpointProtocol::Rtcp => "rtcp",
        };
        f.write_str(s)
    }
}

/// One sub-stream's network address.
///
/// An empty host means the wildcard address on receivers; senders must
/// always name a remote host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub protocol: EndpointProtocol,
    #[serde(default)]
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(protocol: EndpointProtocol, host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol,
            host: host.into(),
            port,
        }
    }

    /// Endpoint with the sub-stream's default port.
    pub fn with_default_port(protocol: EndpointProtocol, host: impl Into<String>) -> Self {
        let port = protocol.default_port();
        Self::new(protocol, host, port)
    }

    fn host_parameter(&self) -> &'static str {
        match self.protocol.substream() {
            Substream::Media => "media_endpoint",
            Substream::Repair => "repair_endpoint",
            Substream::Control => "control_endpoint",
        }
    }

    /// Check the endpoint against the session's FEC scheme.
    pub fn validate_for_scheme(&self, scheme: FecScheme) -> Result<(), ConfigError> {
        match self.protocol.fec_scheme() {
            Some(endpoint_scheme) if endpoint_scheme != scheme => {
                Err(ConfigError::Incompatible {
                    parameter: "fec_encoding",
                    reason: format!(
                        "endpoint protocol `{}` does not match FEC scheme",
                        self.protocol
                    ),
                })
            }
            _ => Ok(()),
        }
    }

    /// Address to bind on the receiving side. Empty host binds wildcard.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = if self.host.is_empty() {
            IpAddr::from([0, 0, 0, 0])
        } else {
            self.host.parse().map_err(|_| ConfigError::InvalidValue {
                parameter: self.host_parameter(),
                reason: format!("`{}` is not a valid IP address", self.host),
            })?
        };
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Address to send to. Senders must name a remote host.
    pub fn connect_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::MissingHost {
                parameter: self.host_parameter(),
            });
        }
        let ip: IpAddr = self.host.parse().map_err(|_| ConfigError::InvalidValue {
            parameter: self.host_parameter(),
            reason: format!("`{}` is not a valid IP address", self.host),
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let host = if self.host.is_empty() {
            "0.0.0.0"
        } else {
            &self.host
        };
        write!(f, "{}://{}:{}", self.protocol, host, self.port)
    }
}
