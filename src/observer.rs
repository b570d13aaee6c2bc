//! Fan-out of received data to subscribers.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::mpsc;
use std::sync::Arc;
use tracing::trace;

/// One chunk of bytes drained from the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceiveEvent {
    pub bytes: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl ReceiveEvent {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            received_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Identifies a subscription for [`ObserverBus::unsubscribe`]. Never reused
/// within a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type Handler = Arc<dyn Fn(&ReceiveEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<(SubscriptionId, Handler)>,
}

/// Ordered set of subscribers to receive events.
///
/// Handlers run synchronously on the publishing thread, in registration
/// order, outside the registry lock. There is no queue between the receive
/// loop and its subscribers: a slow handler delays the next drain.
///
/// Cloning shares the registry.
#[derive(Clone, Default)]
pub struct ObserverBus {
    registry: Arc<Mutex<Registry>>,
}

impl ObserverBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler`; it is called for every event published after
    /// this returns.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ReceiveEvent) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock();
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        registry.entries.push((id, Arc::new(handler)));
        trace!("Subscriber {} registered", id);
        id
    }

    /// Subscribe with a channel; events are cloned into it.
    ///
    /// Events published after the receiver is dropped are discarded.
    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::Receiver<ReceiveEvent>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let id = self.subscribe(move |event| {
            if tx.lock().send(event.clone()).is_err() {
                trace!("Channel subscriber gone; event of {} bytes dropped", event.len());
            }
        });
        (id, rx)
    }

    /// Remove a subscription. Returns `false` if `id` was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry.lock();
        let before = registry.entries.len();
        registry.entries.retain(|(entry, _)| *entry != id);
        let removed = registry.entries.len() != before;
        if removed {
            trace!("Subscriber {} removed", id);
        }
        removed
    }

    /// Call every subscriber with `event`. Returns how many were called.
    pub fn publish(&self, event: &ReceiveEvent) -> usize {
        let handlers: Vec<Handler> = self
            .registry
            .lock()
            .entries
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    pub fn clear(&self) {
        self.registry.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.registry.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ObserverBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverBus")
            .field("subscribers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn recorder(bus: &ObserverBus, tag: &'static str, log: &Arc<Mutex<Vec<String>>>) -> SubscriptionId {
        let log = Arc::clone(log);
        bus.subscribe(move |event| {
            log.lock()
                .push(format!("{}:{}", tag, String::from_utf8_lossy(&event.bytes)))
        })
    }

    #[test]
    fn test_publish_in_registration_order() {
        let bus = ObserverBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        recorder(&bus, "a", &log);
        recorder(&bus, "b", &log);
        recorder(&bus, "c", &log);

        assert_eq!(bus.publish(&ReceiveEvent::new(b"hi".to_vec())), 3);
        assert_eq!(*log.lock(), vec!["a:hi", "b:hi", "c:hi"]);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = ObserverBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = recorder(&bus, "a", &log);
        recorder(&bus, "b", &log);

        assert!(bus.unsubscribe(a));
        assert!(!bus.unsubscribe(a));
        bus.publish(&ReceiveEvent::new(b"x".to_vec()));
        assert_eq!(*log.lock(), vec!["b:x"]);
    }

    #[test]
    fn test_ids_not_reused() {
        let bus = ObserverBus::new();
        let first = bus.subscribe(|_| {});
        bus.unsubscribe(first);
        let second = bus.subscribe(|_| {});
        assert_ne!(first, second);
    }

    #[test]
    fn test_handler_may_unsubscribe_itself() {
        let bus = ObserverBus::new();
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::default();
        let inner_bus = bus.clone();
        let inner_slot = Arc::clone(&slot);
        let id = bus.subscribe(move |_| {
            if let Some(id) = *inner_slot.lock() {
                inner_bus.unsubscribe(id);
            }
        });
        *slot.lock() = Some(id);

        assert_eq!(bus.publish(&ReceiveEvent::new(vec![1])), 1);
        assert!(bus.is_empty());
        assert_eq!(bus.publish(&ReceiveEvent::new(vec![2])), 0);
    }

    #[test]
    fn test_channel_subscriber() {
        let bus = ObserverBus::new();
        let (_id, rx) = bus.subscribe_channel();
        bus.publish(&ReceiveEvent::new(b"abc".to_vec()));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.bytes, b"abc");
        assert_eq!(event.len(), 3);
    }

    #[test]
    fn test_dropped_channel_receiver() {
        let bus = ObserverBus::new();
        let (_id, rx) = bus.subscribe_channel();
        drop(rx);
        assert_eq!(bus.publish(&ReceiveEvent::new(vec![0])), 1);
    }

    #[test]
    fn test_clear() {
        let bus = ObserverBus::new();
        bus.subscribe(|_| {});
        bus.subscribe(|_| {});
        assert_eq!(bus.len(), 2);
        bus.clear();
        assert!(bus.is_empty());
    }
}
