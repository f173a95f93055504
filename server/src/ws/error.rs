//! Error types for the hub and its connections.
//!
//! Connection errors stay local to one subscriber: they end that connection
//! and are logged by the coordinator, nothing more.

use std::time::Duration;
use thiserror::Error;

/// Failure of the underlying duplex transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// I/O or framing failure reported by the WebSocket layer.
    #[error("websocket: {0}")]
    WebSocket(#[from] axum::Error),

    /// The peer side of the transport is gone.
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    pub fn as_label(&self) -> &'static str {
        match self {
            TransportError::WebSocket(_) => "transport_websocket",
            TransportError::Closed => "transport_closed",
        }
    }
}

/// Why a connection actor stopped with an error.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No PONG arrived before the read deadline.
    #[error("no pong received within {0:?}")]
    PongTimeout(Duration),

    /// A frame could not be written before the write deadline.
    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),
}

impl ConnectionError {
    pub fn as_label(&self) -> &'static str {
        match self {
            ConnectionError::Transport(e) => e.as_label(),
            ConnectionError::PongTimeout(_) => "pong_timeout",
            ConnectionError::WriteTimeout(_) => "write_timeout",
        }
    }
}

/// Errors returned by [`Hub`](super::Hub) operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    /// The registry already holds `max` subscribers.
    #[error("hub is at capacity ({max} connections)")]
    CapacityReached { max: usize },

    /// The hub is shutting down or its coordinator has stopped.
    #[error("hub is closed")]
    Closed,

    #[error("invalid hub configuration: {0}")]
    InvalidConfig(&'static str),
}

impl HubError {
    pub fn as_label(&self) -> &'static str {
        match self {
            HubError::CapacityReached { .. } => "hub_capacity_reached",
            HubError::Closed => "hub_closed",
            HubError::InvalidConfig(_) => "hub_invalid_config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        assert_eq!(HubError::CapacityReached { max: 2 }.as_label(), "hub_capacity_reached");
        assert_eq!(
            ConnectionError::from(TransportError::Closed).as_label(),
            "transport_closed"
        );
        assert_eq!(
            ConnectionError::PongTimeout(Duration::from_secs(10)).as_label(),
            "pong_timeout"
        );
    }

    #[test]
    fn capacity_message_names_limit() {
        let err = HubError::CapacityReached { max: 64 };
        assert_eq!(err.to_string(), "hub is at capacity (64 connections)");
    }
}
