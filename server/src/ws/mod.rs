pub mod actor;
pub mod broadcast;
pub mod error;
pub mod handler;
pub mod hub;
pub mod keepalive;
pub mod limiter;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use broadcast::{FanOut, OverflowPolicy};
pub use error::{ConnectionError, HubError, TransportError};
pub use hub::{Hub, HubConfig};
pub use keepalive::Keepalive;
pub use protocol::{Message, OpCode};
pub use registry::SubscriberHandle;
pub use transport::{split_socket, FrameSink, FrameStream};

/// Identifier of one WebSocket connection.
/// UUID v7, so ids sort by connection time.
pub type ConnectionId = uuid::Uuid;
