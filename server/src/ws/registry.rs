use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::broadcast::{fan_out, FanOut, OverflowPolicy};
use super::error::HubError;
use super::protocol::Message;
use super::ConnectionId;

/// The coordinator's view of one subscriber: where to enqueue its messages
/// and how to close it. The transport itself lives in the connection actor.
#[derive(Debug, Clone)]
pub struct SubscriberHandle {
    pub id: ConnectionId,
    pub(crate) queue: mpsc::Sender<Message>,
    pub(crate) closed: CancellationToken,
}

impl SubscriberHandle {
    pub fn new(id: ConnectionId, queue: mpsc::Sender<Message>) -> Self {
        Self {
            id,
            queue,
            closed: CancellationToken::new(),
        }
    }

    /// Close the connection. Safe to call any number of times from anywhere.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Token the connection's reader and writer watch.
    pub fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

/// Live set of subscribers. Only ever touched from the coordinator loop.
#[derive(Debug)]
pub(crate) struct Registry {
    subscribers: HashMap<ConnectionId, SubscriberHandle>,
    /// 0 means unbounded.
    max_connections: usize,
    policy: OverflowPolicy,
}

impl Registry {
    pub fn new(max_connections: usize, policy: OverflowPolicy) -> Self {
        Self {
            subscribers: HashMap::new(),
            max_connections,
            policy,
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    #[cfg(test)]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.subscribers.contains_key(id)
    }

    pub fn is_full(&self) -> bool {
        self.max_connections > 0 && self.subscribers.len() >= self.max_connections
    }

    /// Add a subscriber, refusing without side effects when at capacity.
    pub fn insert(&mut self, subscriber: SubscriberHandle) -> Result<(), HubError> {
        if self.is_full() {
            return Err(HubError::CapacityReached {
                max: self.max_connections,
            });
        }
        self.subscribers.insert(subscriber.id, subscriber);
        Ok(())
    }

    /// Remove a subscriber if present. Returns whether anything was removed.
    pub fn remove(&mut self, id: &ConnectionId) -> bool {
        match self.subscribers.remove(id) {
            Some(subscriber) => {
                subscriber.close();
                true
            }
            None => false,
        }
    }

    pub fn broadcast(&mut self, origin: Option<ConnectionId>, message: &Message) -> FanOut {
        fan_out(&mut self.subscribers, origin, message, self.policy)
    }

    /// Offer a final message to everyone. Subscribers that cannot take it are
    /// closed right away whatever the overflow policy says.
    pub fn shutdown(&mut self, message: &Message) -> FanOut {
        fan_out(&mut self.subscribers, None, message, OverflowPolicy::Evict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(capacity: usize) -> (SubscriberHandle, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        (SubscriberHandle::new(ConnectionId::now_v7(), tx), rx)
    }

    #[test]
    fn rejects_past_capacity_without_mutation() {
        let mut registry = Registry::new(1, OverflowPolicy::Evict);
        let (a, _a_rx) = handle(1);
        let (b, _b_rx) = handle(1);
        let b_id = b.id;

        registry.insert(a).unwrap();
        let err = registry.insert(b).unwrap_err();

        assert_eq!(err, HubError::CapacityReached { max: 1 });
        assert_eq!(registry.len(), 1);
        assert!(!registry.contains(&b_id));
    }

    #[test]
    fn zero_capacity_is_unbounded() {
        let mut registry = Registry::new(0, OverflowPolicy::Evict);
        let mut receivers = Vec::new();
        for _ in 0..100 {
            let (h, rx) = handle(1);
            registry.insert(h).unwrap();
            receivers.push(rx);
        }
        assert_eq!(registry.len(), 100);
        assert!(!registry.is_full());
    }

    #[test]
    fn remove_is_idempotent() {
        let mut registry = Registry::new(0, OverflowPolicy::Evict);
        let (a, _a_rx) = handle(1);
        let (b, _b_rx) = handle(1);
        let a_id = a.id;
        let token = a.close_token();
        registry.insert(a).unwrap();
        registry.insert(b).unwrap();

        assert!(registry.remove(&a_id));
        assert!(!registry.remove(&a_id));
        assert_eq!(registry.len(), 1);
        assert!(token.is_cancelled());
    }

    #[test]
    fn shutdown_closes_full_queues_under_drop_policy() {
        let mut registry = Registry::new(0, OverflowPolicy::Drop);
        let (a, _a_rx) = handle(1);
        let token = a.close_token();
        registry.insert(a).unwrap();

        registry.broadcast(None, &Message::text("fills the queue"));
        let report = registry.shutdown(&Message::close(1001, "bye"));

        assert_eq!(report.evicted.len(), 1);
        assert!(registry.is_empty());
        assert!(token.is_cancelled());
    }

    #[test]
    fn eviction_frees_capacity() {
        let mut registry = Registry::new(2, OverflowPolicy::Evict);
        let (a, _a_rx) = handle(1);
        let (b, mut b_rx) = handle(1);
        let a_id = a.id;
        registry.insert(a).unwrap();
        registry.insert(b).unwrap();

        registry.broadcast(Some(a_id), &Message::text("hi"));
        assert_eq!(b_rx.try_recv().unwrap(), Message::text("hi"));

        // B does not drain: refill its single slot, then overflow it.
        registry.broadcast(Some(a_id), &Message::text("again"));
        let report = registry.broadcast(Some(a_id), &Message::text("second"));
        assert_eq!(report.evicted.len(), 1);
        assert_eq!(registry.len(), 1);

        let (c, _c_rx) = handle(1);
        registry.insert(c).unwrap();
        assert_eq!(registry.len(), 2);
    }
}
