use axum::extract::ws::{self, WebSocket};
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};

use super::error::TransportError;
use super::protocol::Message;

/// Write half of a duplex transport. Owned by a connection's writer task.
pub trait FrameSink: Sink<Message, Error = TransportError> + Send + Unpin + 'static {}

impl<T> FrameSink for T where T: Sink<Message, Error = TransportError> + Send + Unpin + 'static {}

/// Read half of a duplex transport. Owned by a connection's reader task.
///
/// The stream ending is treated like a CLOSE from the peer.
pub trait FrameStream: Stream<Item = Result<Message, TransportError>> + Send + Unpin + 'static {}

impl<T> FrameStream for T where
    T: Stream<Item = Result<Message, TransportError>> + Send + Unpin + 'static
{
}

/// Split an upgraded axum WebSocket into hub-level halves.
///
/// Fragmented messages are reassembled by the WebSocket layer, and incoming
/// pings are answered by it on the next read, so the halves only ever see
/// whole frames.
pub fn split_socket(socket: WebSocket) -> (impl FrameSink, impl FrameStream) {
    let (sink, stream) = socket.split();

    let sink = sink
        .sink_map_err(TransportError::from)
        .with(|msg: Message| future::ready(Ok::<ws::Message, TransportError>(msg.into())));
    let stream = stream.map(|frame| frame.map(Message::from).map_err(TransportError::from));

    (sink, stream)
}
