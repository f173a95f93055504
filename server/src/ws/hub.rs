//! The hub coordinator.
//!
//! A single task owns the [`Registry`] and applies every register,
//! unregister and broadcast request in the order it arrives on one bounded
//! command channel. [`Hub`] is the cloneable handle used to talk to it.

use std::num::NonZeroU32;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::task::TaskTracker;

use super::actor::{self, ConnectionContext};
use super::broadcast::OverflowPolicy;
use super::error::{ConnectionError, HubError};
use super::keepalive::Keepalive;
use super::limiter::PublishLimiter;
use super::protocol::{Message, CLOSE_GOING_AWAY, CLOSE_TRY_AGAIN_LATER};
use super::registry::{Registry, SubscriberHandle};
use super::transport::{FrameSink, FrameStream};
use super::ConnectionId;

/// Depth of the coordinator's command channel.
const COMMAND_BUFFER: usize = 1024;

/// Runtime parameters of a [`Hub`].
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum concurrent connections; 0 means unbounded.
    pub max_connections: usize,
    /// Capacity of each subscriber's outbound queue. Must be positive.
    pub queue_capacity: usize,
    pub keepalive: Keepalive,
    /// One publish token is added every `publish_interval`.
    pub publish_interval: Duration,
    pub publish_burst: NonZeroU32,
    pub overflow_policy: OverflowPolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_connections: 0,
            queue_capacity: 256,
            keepalive: Keepalive::default(),
            publish_interval: Duration::from_millis(100),
            publish_burst: NonZeroU32::new(8).unwrap_or(NonZeroU32::MIN),
            overflow_policy: OverflowPolicy::Evict,
        }
    }
}

enum Command {
    Register {
        subscriber: SubscriberHandle,
        reply: oneshot::Sender<Result<(), HubError>>,
    },
    Unregister {
        id: ConnectionId,
        error: Option<ConnectionError>,
    },
    Broadcast {
        origin: Option<ConnectionId>,
        message: Message,
    },
    Len {
        reply: oneshot::Sender<usize>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the hub coordinator. Cheap to clone.
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::Sender<Command>,
    limiter: PublishLimiter,
    tasks: TaskTracker,
    queue_capacity: usize,
    keepalive: Keepalive,
}

impl Hub {
    /// Start a coordinator on the current tokio runtime.
    ///
    /// Fails when the configuration cannot describe a working hub.
    pub fn new(config: HubConfig) -> Result<Self, HubError> {
        if config.queue_capacity == 0 {
            return Err(HubError::InvalidConfig("queue capacity must be positive"));
        }
        let limiter = PublishLimiter::new(config.publish_interval, config.publish_burst)
            .ok_or(HubError::InvalidConfig("publish interval must be positive"))?;
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);

        let coordinator = Coordinator {
            registry: Registry::new(config.max_connections, config.overflow_policy),
            commands: rx,
            closing: false,
            drained: Vec::new(),
        };
        tokio::spawn(coordinator.run());

        Ok(Self {
            commands,
            limiter,
            tasks: TaskTracker::new(),
            queue_capacity: config.queue_capacity,
            keepalive: config.keepalive,
        })
    }

    /// Register a new subscriber over an already upgraded transport and start
    /// its reader and writer.
    ///
    /// A refused connection is sent a CLOSE frame before the error returns.
    pub async fn connect<Tx, Rx>(&self, mut sink: Tx, stream: Rx) -> Result<ConnectionId, HubError>
    where
        Tx: FrameSink,
        Rx: FrameStream,
    {
        let id = ConnectionId::now_v7();
        let (queue, outbound) = mpsc::channel(self.queue_capacity);
        let subscriber = SubscriberHandle::new(id, queue);
        let closed = subscriber.close_token();

        if let Err(err) = self.register(subscriber).await {
            tracing::warn!(connection_id = %id, error = %err, "Connection refused");
            let code = match err {
                HubError::CapacityReached { .. } => CLOSE_TRY_AGAIN_LATER,
                HubError::Closed | HubError::InvalidConfig(_) => CLOSE_GOING_AWAY,
            };
            let _ = actor::send_close(&mut sink, code, &err.to_string(), self.keepalive.write_wait)
                .await;
            return Err(err);
        }

        let ctx = ConnectionContext {
            id,
            hub: self.clone(),
            closed,
            finished: Arc::new(AtomicBool::new(false)),
            keepalive: self.keepalive,
        };
        self.tasks.spawn(actor::write_loop(ctx.clone(), sink, outbound));
        self.tasks.spawn(actor::read_loop(ctx, stream, self.limiter.clone()));

        tracing::info!(connection_id = %id, "Connection registered");
        Ok(id)
    }

    /// Insert a subscriber into the registry.
    pub(crate) async fn register(&self, subscriber: SubscriberHandle) -> Result<(), HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Register { subscriber, reply }).await?;
        rx.await.map_err(|_| HubError::Closed)?
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub async fn unregister(&self, id: ConnectionId) {
        let _ = self.send(Command::Unregister { id, error: None }).await;
    }

    /// Remove a subscriber and hand the coordinator the error that ended it.
    pub(crate) async fn unregister_with(&self, id: ConnectionId, error: Option<ConnectionError>) {
        let _ = self.send(Command::Unregister { id, error }).await;
    }

    /// Fan a message out to every subscriber except `origin`.
    pub async fn publish(&self, origin: ConnectionId, message: Message) -> Result<(), HubError> {
        self.send(Command::Broadcast {
            origin: Some(origin),
            message,
        })
        .await
    }

    /// Fan a hub-initiated message out to every subscriber.
    pub async fn broadcast(&self, message: Message) -> Result<(), HubError> {
        self.send(Command::Broadcast {
            origin: None,
            message,
        })
        .await
    }

    /// Number of registered subscribers.
    pub async fn len(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Len { reply }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Send CLOSE to every subscriber, refuse new ones, and wait until every
    /// connection has unregistered and all its tasks have exited.
    pub async fn close(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Close { reply }).await.is_ok() {
            let _ = rx.await;
        }
        self.tasks.close();
        self.tasks.wait().await;
        tracing::info!("Hub closed");
    }

    async fn send(&self, command: Command) -> Result<(), HubError> {
        self.commands.send(command).await.map_err(|_| HubError::Closed)
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("queue_capacity", &self.queue_capacity)
            .field("keepalive", &self.keepalive)
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

struct Coordinator {
    registry: Registry,
    commands: mpsc::Receiver<Command>,
    closing: bool,
    /// Callers of `close` waiting for the registry to empty.
    drained: Vec<oneshot::Sender<()>>,
}

impl Coordinator {
    async fn run(mut self) {
        tracing::debug!("Hub coordinator started");

        while let Some(command) = self.commands.recv().await {
            self.handle(command);

            if self.closing && self.registry.is_empty() {
                for waiter in self.drained.drain(..) {
                    let _ = waiter.send(());
                }
            }
        }

        tracing::debug!("Hub coordinator stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Register { subscriber, reply } => {
                let result = if self.closing {
                    Err(HubError::Closed)
                } else {
                    self.registry.insert(subscriber)
                };
                let _ = reply.send(result);
            }
            Command::Unregister { id, error } => {
                let removed = self.registry.remove(&id);
                match error {
                    Some(e) => tracing::warn!(
                        connection_id = %id,
                        error = %e,
                        kind = e.as_label(),
                        "Connection failed"
                    ),
                    None if removed => {
                        tracing::debug!(connection_id = %id, "Connection unregistered")
                    }
                    None => {}
                }
            }
            Command::Broadcast { origin, message } => {
                let report = self.registry.broadcast(origin, &message);
                tracing::trace!(
                    origin = ?origin,
                    delivered = report.delivered,
                    evicted = report.evicted.len(),
                    dropped = report.dropped,
                    "Broadcast"
                );
            }
            Command::Len { reply } => {
                let _ = reply.send(self.registry.len());
            }
            Command::Close { reply } => {
                if !self.closing {
                    self.closing = true;
                    tracing::info!(
                        connections = self.registry.len(),
                        "Hub closing, notifying subscribers"
                    );
                    self.registry
                        .shutdown(&Message::close(CLOSE_GOING_AWAY, "server shutdown"));
                }
                self.drained.push(reply);
            }
        }
    }
}
