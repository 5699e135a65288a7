//! Peer transport contract.
//!
//! The session layer only needs a handful of operations from whatever carries
//! bytes between peers: listen under a room-derived address, dial one, fan out
//! to open connections and target a single one. Everything else surfaces as a
//! [`TransportEvent`] on the receiver handed out at construction time.

pub mod memory;
pub mod ws;

use crate::protocol::NetworkMessage;
use crate::room::RoomCode;
use crate::types::{env_trimmed, ConnectionId};
use async_trait::async_trait;
use std::time::Duration;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use ws::WsTransport;

/// Errors surfaced by a transport
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("no answer from {0} within {1:?}")]
    ConnectionTimeout(String, Duration),

    #[error("address {0} is already taken")]
    AddressInUse(String),

    #[error("unknown peer {0}")]
    UnknownPeer(ConnectionId),

    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),

    #[error("operation not supported by this transport: {0}")]
    Unsupported(&'static str),

    #[error("signaling service unavailable")]
    SignalingUnavailable,
}

/// Something that happened on the wire
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A remote peer finished connecting to us
    ConnectionOpened(ConnectionId),
    /// A message arrived from `peer`
    Message {
        peer: ConnectionId,
        msg: NetworkMessage,
    },
    /// A peer connection broke; it will not come back
    PeerDisconnected(ConnectionId),
    /// Lost the discovery/signaling layer; reconnection is being attempted
    SignalingLost,
    /// Re-registered with the discovery/signaling layer
    SignalingRestored,
}

/// Bidirectional message carrier between peers.
///
/// Implementations deliver inbound traffic through an event channel created
/// alongside the transport, so the session owning the receiver can `select!`
/// over it together with its other inputs.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start accepting connections under the address derived from `room`
    async fn host(&self, room: &RoomCode) -> Result<(), TransportError>;

    /// Open a connection to the host of `room`, returning the host's
    /// connection id. Fails with `ConnectionTimeout` if nobody answers.
    async fn join(&self, room: &RoomCode) -> Result<ConnectionId, TransportError>;

    /// Best-effort send to every open connection. Closed ones are skipped.
    async fn broadcast(&self, msg: &NetworkMessage);

    /// Send to one connection
    async fn send_to(&self, peer: &ConnectionId, msg: &NetworkMessage)
        -> Result<(), TransportError>;

    /// Close one connection from our side
    async fn disconnect(&self, peer: &ConnectionId);
}

/// Transport settings
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Prefix mixed into every room address
    pub namespace: String,
    /// How long `join` waits for the host to answer
    pub join_timeout: Duration,
    /// Delay between attempts to reach the signaling layer again
    pub signaling_retry: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            namespace: "tonedeaf-party".to_string(),
            join_timeout: Duration::from_secs(10),
            signaling_retry: Duration::from_millis(1000),
        }
    }
}

impl TransportConfig {
    /// Load transport settings from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            namespace: env_trimmed("PEER_NAMESPACE").unwrap_or(defaults.namespace),
            join_timeout: env_trimmed("JOIN_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.join_timeout),
            signaling_retry: env_trimmed("SIGNALING_RETRY_MS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.signaling_retry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_config_from_env() {
        std::env::set_var("PEER_NAMESPACE", "  party-test ");
        std::env::set_var("JOIN_TIMEOUT_SECS", "3");
        std::env::remove_var("SIGNALING_RETRY_MS");

        let config = TransportConfig::from_env();
        assert_eq!(config.namespace, "party-test");
        assert_eq!(config.join_timeout, Duration::from_secs(3));
        assert_eq!(config.signaling_retry, Duration::from_millis(1000));

        std::env::remove_var("PEER_NAMESPACE");
        std::env::remove_var("JOIN_TIMEOUT_SECS");
    }
}
