use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::error::ConnectionError;
use super::hub::Hub;
use super::keepalive::Keepalive;
use super::limiter::PublishLimiter;
use super::protocol::{Message, OpCode, CLOSE_GOING_AWAY};
use super::transport::{FrameSink, FrameStream};
use super::ConnectionId;

/// Everything the reader and writer of one connection share.
#[derive(Clone)]
pub(crate) struct ConnectionContext {
    pub id: ConnectionId,
    pub hub: Hub,
    /// Cancelled exactly when the connection should go away, by whichever
    /// side notices first (reader, writer or the coordinator's eviction).
    pub closed: CancellationToken,
    /// Set by the first task to finish; only that task reports its error.
    pub finished: Arc<AtomicBool>,
    pub keepalive: Keepalive,
}

impl ConnectionContext {
    /// Tear down this connection. Only the first task to get here reports
    /// its error; the second one just confirms the unregister.
    async fn finish(&self, task: &'static str, result: Result<(), ConnectionError>) {
        let first = !self.finished.swap(true, Ordering::AcqRel);
        self.closed.cancel();
        let error = if first { result.err() } else { None };
        tracing::debug!(
            connection_id = %self.id,
            task,
            failed = error.is_some(),
            "Connection task stopped"
        );
        self.hub.unregister_with(self.id, error).await;
    }
}

/// Reader half of the connection actor.
///
/// Reads frames until the peer closes, the transport fails, no PONG arrives
/// within `pong_wait`, or the connection is closed from elsewhere. Data
/// frames are admitted through the shared limiter and then published.
pub(crate) async fn read_loop<Rx>(ctx: ConnectionContext, stream: Rx, limiter: PublishLimiter)
where
    Rx: FrameStream,
{
    let result = read_frames(&ctx, stream, &limiter).await;
    ctx.finish("reader", result).await;
}

async fn read_frames<Rx>(
    ctx: &ConnectionContext,
    mut stream: Rx,
    limiter: &PublishLimiter,
) -> Result<(), ConnectionError>
where
    Rx: FrameStream,
{
    let deadline = ctx.keepalive.read_deadline();
    tokio::pin!(deadline);

    loop {
        let msg = tokio::select! {
            biased;
            _ = ctx.closed.cancelled() => return Ok(()),
            _ = &mut deadline => {
                return Err(ConnectionError::PongTimeout(ctx.keepalive.pong_wait));
            }
            frame = stream.next() => match frame {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    // Errors caused by our own close are not worth reporting.
                    if ctx.closed.is_cancelled() {
                        return Ok(());
                    }
                    return Err(e.into());
                }
                None => {
                    tracing::info!(connection_id = %ctx.id, "Transport stream ended");
                    return Ok(());
                }
            },
        };

        match msg.opcode {
            OpCode::Ping => {
                tracing::trace!(connection_id = %ctx.id, "ping");
            }
            OpCode::Pong => {
                tracing::trace!(connection_id = %ctx.id, "pong");
                ctx.keepalive.extend(deadline.as_mut());
            }
            OpCode::Close => {
                tracing::info!(
                    connection_id = %ctx.id,
                    code = ?msg.close_code(),
                    reason = %msg.close_reason(),
                    "Client initiated close"
                );
                return Ok(());
            }
            OpCode::Text | OpCode::Binary => {
                tokio::select! {
                    biased;
                    _ = ctx.closed.cancelled() => return Ok(()),
                    _ = limiter.admit() => {}
                }
                let published = tokio::select! {
                    biased;
                    _ = ctx.closed.cancelled() => return Ok(()),
                    result = ctx.hub.publish(ctx.id, msg) => result,
                };
                if published.is_err() {
                    // Coordinator is gone; nothing left to publish to.
                    return Ok(());
                }
            }
            OpCode::Other(code) => {
                tracing::debug!(connection_id = %ctx.id, opcode = code, "Discarding unknown frame");
            }
        }
    }
}

/// How the writer's queue loop ended without an error.
enum WriterExit {
    /// A CLOSE frame already went out.
    CloseSent,
    /// The connection was closed from elsewhere; the peer still needs a CLOSE.
    CloseOwed,
}

/// Writer half of the connection actor.
///
/// Drains the outbound queue onto the transport and sends a PING on every
/// keepalive tick. Each write must finish within `write_wait`.
///
/// The connection is unregistered before the final CLOSE and flush, so a
/// slow peer never holds its registry slot past the write that failed.
pub(crate) async fn write_loop<Tx>(
    ctx: ConnectionContext,
    mut sink: Tx,
    outbound: mpsc::Receiver<Message>,
) where
    Tx: FrameSink,
{
    let result = write_frames(&ctx, &mut sink, outbound).await;
    let exit = result.as_ref().ok().map(|exit| matches!(exit, WriterExit::CloseOwed));
    ctx.finish("writer", result.map(|_| ())).await;

    // Skipped after a write error or timeout.
    if let Some(close_owed) = exit {
        let _ = timeout(ctx.keepalive.write_wait, async {
            if close_owed {
                sink.send(Message::close(CLOSE_GOING_AWAY, "")).await?;
            }
            sink.close().await
        })
        .await;
    }
}

async fn write_frames<Tx>(
    ctx: &ConnectionContext,
    sink: &mut Tx,
    mut outbound: mpsc::Receiver<Message>,
) -> Result<WriterExit, ConnectionError>
where
    Tx: FrameSink,
{
    let write_wait = ctx.keepalive.write_wait;
    let mut ticker = ctx.keepalive.ping_ticker();

    loop {
        tokio::select! {
            biased;
            _ = ctx.closed.cancelled() => return Ok(WriterExit::CloseOwed),
            msg = outbound.recv() => match msg {
                Some(msg) => {
                    let is_close = msg.is_close();
                    write(sink, msg, write_wait).await?;
                    if is_close {
                        return Ok(WriterExit::CloseSent);
                    }
                }
                // The coordinator dropped us.
                None => return Ok(WriterExit::CloseOwed),
            },
            _ = ticker.tick() => {
                write(sink, Message::ping(), write_wait).await?;
            }
        }
    }
}

async fn write<Tx>(sink: &mut Tx, msg: Message, write_wait: Duration) -> Result<(), ConnectionError>
where
    Tx: FrameSink,
{
    match timeout(write_wait, sink.send(msg)).await {
        Ok(result) => result.map_err(ConnectionError::from),
        Err(_) => Err(ConnectionError::WriteTimeout(write_wait)),
    }
}

/// Best-effort CLOSE frame, bounded by `write_wait`.
pub(crate) async fn send_close<Tx>(
    sink: &mut Tx,
    code: u16,
    reason: &str,
    write_wait: Duration,
) -> Result<(), ConnectionError>
where
    Tx: FrameSink,
{
    write(sink, Message::close(code, reason), write_wait).await
}
