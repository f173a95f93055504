//! Fan-out of one message onto many subscriber queues.
//!
//! Enqueueing never waits: each subscriber gets exactly one `try_send`. What
//! happens when its queue is full is decided by [`OverflowPolicy`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc::error::TrySendError;

use super::protocol::Message;
use super::registry::SubscriberHandle;
use super::ConnectionId;

/// What to do with a subscriber whose outbound queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Treat the subscriber as dead: remove it and close its connection.
    #[default]
    Evict,
    /// Keep the subscriber, lose this one message for it.
    Drop,
}

/// Outcome of one fan-out pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FanOut {
    /// Queues that accepted the message.
    pub delivered: usize,
    /// Subscribers removed because their queue was full.
    pub evicted: Vec<ConnectionId>,
    /// Subscribers that missed the message under [`OverflowPolicy::Drop`].
    pub dropped: usize,
    /// Subscribers removed because their writer had already gone away.
    pub gone: usize,
}

/// Offer `message` to every subscriber except `origin`.
///
/// Removed subscribers have their connection cancelled before this returns.
pub(crate) fn fan_out(
    subscribers: &mut HashMap<ConnectionId, SubscriberHandle>,
    origin: Option<ConnectionId>,
    message: &Message,
    policy: OverflowPolicy,
) -> FanOut {
    let mut report = FanOut::default();

    subscribers.retain(|id, subscriber| {
        if origin == Some(*id) {
            return true;
        }

        match subscriber.queue.try_send(message.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => match policy {
                OverflowPolicy::Evict => {
                    tracing::warn!(
                        connection_id = %id,
                        capacity = subscriber.queue.max_capacity(),
                        "Outbound queue full, evicting subscriber"
                    );
                    subscriber.close();
                    report.evicted.push(*id);
                    false
                }
                OverflowPolicy::Drop => {
                    tracing::debug!(connection_id = %id, "Outbound queue full, dropping message");
                    report.dropped += 1;
                    true
                }
            },
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(connection_id = %id, "Writer gone, removing subscriber");
                subscriber.close();
                report.gone += 1;
                false
            }
        }
    });

    report
}
