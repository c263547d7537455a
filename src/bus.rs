//! In-memory publish/subscribe fanout for state-change events.
//!
//! ## Backpressure policy
//!
//! Each subscriber gets its own bounded channel. `publish` snapshots the
//! subscriber set under a short lock, then sends outside the lock with
//! `try_send`: a full channel drops that subscriber's copy of the event (the
//! drop is counted and warn-logged), a closed channel gets the subscriber
//! pruned. A slow or stalled subscriber therefore never blocks the publisher
//! or its peers.
//!
//! Events for a single atom id are published in transition order and each
//! channel is FIFO, so per-subscriber, per-atom ordering matches the
//! transition table.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::types::AtomEvent;

/// Default per-subscriber channel capacity.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// Opaque handle identifying a subscriber.
pub type SubscriberId = Uuid;

struct SubscriberEntry {
    id: SubscriberId,
    sender: mpsc::Sender<AtomEvent>,
}

struct BusInner {
    subscribers: Mutex<Vec<SubscriberEntry>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl BusInner {
    fn remove(&self, id: SubscriberId) {
        self.subscribers.lock().retain(|entry| entry.id != id);
    }
}

/// Fanout registry for live observers.
///
/// Cheap to share: components hold an `Arc<EventBus>` and call
/// [`EventBus::publish`] synchronously from async context.
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus with the default per-subscriber capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    /// Create a bus with an explicit per-subscriber channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(Vec::new()),
                capacity: capacity.max(1),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Register a new subscriber and return its receiving end.
    ///
    /// The subscription unsubscribes itself when dropped.
    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.inner.capacity);
        let id = Uuid::new_v4();
        self.inner
            .subscribers
            .lock()
            .push(SubscriberEntry { id, sender });
        tracing::debug!(subscriber_id = %id, "Subscriber registered");
        Subscription {
            id,
            receiver,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscriber. Idempotent: unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriberId) {
        self.inner.remove(id);
    }

    /// Fan an event out to every live subscriber.
    ///
    /// Never blocks: sends use `try_send` against a snapshot of the
    /// subscriber set taken under a short-held lock.
    pub fn publish(&self, event: AtomEvent) {
        let snapshot: Vec<(SubscriberId, mpsc::Sender<AtomEvent>)> = {
            let subscribers = self.inner.subscribers.lock();
            subscribers
                .iter()
                .map(|entry| (entry.id, entry.sender.clone()))
                .collect()
        };

        let mut closed: Vec<SubscriberId> = Vec::new();
        for (id, sender) in snapshot {
            match sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(subscriber_id = %id, "Subscriber channel full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    closed.push(id);
                }
            }
        }

        if !closed.is_empty() {
            self.inner
                .subscribers
                .lock()
                .retain(|entry| !closed.contains(&entry.id));
        }
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Total events dropped due to full subscriber channels.
    pub fn dropped_events(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("capacity", &self.inner.capacity)
            .field("dropped", &self.dropped_events())
            .finish()
    }
}

/// A live subscription to the bus.
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<AtomEvent>,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// This subscription's handle.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Receive the next event, or `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<AtomEvent> {
        self.receiver.recv().await
    }

    /// Receive without waiting, `None` if no event is buffered.
    pub fn try_recv(&mut self) -> Option<AtomEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AtomStatus;

    fn changed(id: &str, status: AtomStatus) -> AtomEvent {
        AtomEvent::AtomChanged { atom_id: id.to_string(), status }
    }

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = EventBus::new();
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        bus.publish(changed("a", AtomStatus::Busy));

        assert_eq!(sub1.recv().await, Some(changed("a", AtomStatus::Busy)));
        assert_eq!(sub2.recv().await, Some(changed("a", AtomStatus::Busy)));
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        let id = sub.id();
        assert_eq!(bus.subscriber_count(), 1);

        bus.unsubscribe(id);
        bus.unsubscribe(id);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let bus = EventBus::new();
        {
            let _sub = bus.subscribe();
            assert_eq!(bus.subscriber_count(), 1);
        }
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_block_publish() {
        let bus = EventBus::with_capacity(2);
        let mut stalled = bus.subscribe();
        let mut healthy = bus.subscribe();

        // Neither subscriber reads while five events go out; each channel
        // buffers two and sheds three, publish returns every time.
        for i in 0..5 {
            bus.publish(changed(&format!("atom{i}"), AtomStatus::Claimed));
        }

        assert_eq!(bus.dropped_events(), 6);

        // Each subscriber still holds its first two events in order.
        for sub in [&mut stalled, &mut healthy] {
            assert_eq!(sub.try_recv(), Some(changed("atom0", AtomStatus::Claimed)));
            assert_eq!(sub.try_recv(), Some(changed("atom1", AtomStatus::Claimed)));
            assert_eq!(sub.try_recv(), None);
        }
    }

    #[tokio::test]
    async fn test_per_atom_ordering_preserved() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();

        bus.publish(changed("a", AtomStatus::Busy));
        bus.publish(changed("a", AtomStatus::Endorsed));

        assert_eq!(sub.recv().await, Some(changed("a", AtomStatus::Busy)));
        assert_eq!(sub.recv().await, Some(changed("a", AtomStatus::Endorsed)));
    }

    #[tokio::test]
    async fn test_publish_after_subscriber_drop() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        let mut keep = bus.subscribe();
        drop(sub);

        bus.publish(changed("a", AtomStatus::Claimed));
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(keep.recv().await, Some(changed("a", AtomStatus::Claimed)));
    }
}
