//! Transport configuration and the per-datagram size budget.

use crate::error::TransportError;
use serde::Deserialize;

/// Agent address used when none is configured.
pub const DEFAULT_AGENT_HOST_PORT: &str = "localhost:6831";

/// Largest UDP payload the agent accepts.
pub const UDP_PACKET_MAX_LENGTH: usize = 65000;

/// macOS caps UDP datagrams at `net.inet.udp.maxdgram`, 9216 bytes by default.
pub const MAC_UDP_MAX_SIZE: usize = 9216;

/// Bytes reserved in every datagram for the `emitBatch` message framing.
pub const EMIT_BATCH_OVERHEAD: usize = 30;

/// Default packet size for the given OS identifier (as in `std::env::consts::OS`).
pub fn default_max_packet_size_for(os: &str) -> usize {
    match os {
        "macos" | "ios" => MAC_UDP_MAX_SIZE,
        _ => UDP_PACKET_MAX_LENGTH,
    }
}

/// Default packet size for the host platform.
pub fn default_max_packet_size() -> usize {
    default_max_packet_size_for(std::env::consts::OS)
}

/// Configuration for a [`Transport`](crate::Transport).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Agent address as `host:port`.
    ///
    /// Default: `localhost:6831`
    pub agent_host_port: String,

    /// Maximum datagram size in bytes. `0` selects the platform default.
    ///
    /// Default: 0
    pub max_packet_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            agent_host_port: DEFAULT_AGENT_HOST_PORT.to_string(),
            max_packet_size: 0,
        }
    }
}

impl TransportConfig {
    /// Parses a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, TransportError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Sets the agent address.
    pub fn with_agent_host_port(mut self, host_port: impl Into<String>) -> Self {
        self.agent_host_port = host_port.into();
        self
    }

    /// Sets the maximum datagram size.
    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    /// The packet size in effect, with `0` resolved to the platform default.
    pub fn resolved_packet_size(&self) -> usize {
        if self.max_packet_size == 0 {
            default_max_packet_size()
        } else {
            self.max_packet_size
        }
    }

    /// Span budget per datagram for this configuration.
    pub fn max_batch_bytes(&self) -> Result<MaxBatchBytes, TransportError> {
        MaxBatchBytes::from_packet_size(self.resolved_packet_size())
    }
}

/// Per-datagram budget for the process descriptor plus spans:
/// `max_packet_size - EMIT_BATCH_OVERHEAD`.
///
/// Fixed for the lifetime of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MaxBatchBytes(usize);

impl MaxBatchBytes {
    pub fn from_packet_size(max_packet_size: usize) -> Result<Self, TransportError> {
        if max_packet_size <= EMIT_BATCH_OVERHEAD {
            return Err(TransportError::PacketTooSmall {
                size: max_packet_size,
                overhead: EMIT_BATCH_OVERHEAD,
            });
        }
        Ok(Self(max_packet_size - EMIT_BATCH_OVERHEAD))
    }

    /// Budget in bytes
    #[inline]
    pub fn get(self) -> usize {
        self.0
    }

    /// The datagram size this budget was derived from.
    #[inline]
    pub fn packet_size(self) -> usize {
        self.0 + EMIT_BATCH_OVERHEAD
    }
}
