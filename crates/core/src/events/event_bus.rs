use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::Receiver;

use crate::shared::constants::EVENT_HISTORY_CAPACITY;

use super::recognition_event::RecognitionEvent;

pub type Subscriber = Arc<dyn Fn(&RecognitionEvent) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// In-process publish/subscribe channel for recognition events.
///
/// Fan-out is synchronous on the publishing thread. Each subscriber call is
/// isolated: a panicking subscriber is logged and skipped, and neither the
/// publisher nor the remaining subscribers observe it. The most recent
/// `capacity` events are kept in a ring buffer for [`EventBus::snapshot`].
pub struct EventBus {
    capacity: usize,
    history: Mutex<VecDeque<RecognitionEvent>>,
    subscribers: Mutex<Vec<(SubscriptionId, Subscriber)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            history: Mutex::new(VecDeque::with_capacity(capacity)),
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn publish(&self, event: RecognitionEvent) {
        // Subscribers may (un)subscribe from inside a callback, so the list
        // is copied out before any of them runs. It is copied under the
        // history lock to keep `subscribe_with_history` gap-free.
        let subscribers: Vec<(SubscriptionId, Subscriber)> = {
            let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
            if history.len() == self.capacity {
                history.pop_front();
            }
            history.push_back(event.clone());
            self.subscribers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
        };

        for (id, subscriber) in subscribers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| subscriber(&event)));
            if outcome.is_err() {
                log::warn!(
                    "Event subscriber {:?} panicked while handling {}",
                    id,
                    event.event_type
                );
            }
        }
    }

    pub fn subscribe<F>(&self, subscriber: F) -> SubscriptionId
    where
        F: Fn(&RecognitionEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(subscriber)));
        id
    }

    /// Subscribes and first replays the retained history to the new
    /// subscriber, so a late listener still sees the events published before
    /// it registered. Every event reaches it exactly once.
    pub fn subscribe_with_history<F>(&self, subscriber: F) -> SubscriptionId
    where
        F: Fn(&RecognitionEvent) + Send + Sync + 'static,
    {
        let subscriber: Subscriber = Arc::new(subscriber);
        let (id, backlog) = {
            let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
            let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
            self.subscribers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((id, subscriber.clone()));
            (id, history.iter().cloned().collect::<Vec<_>>())
        };

        for event in &backlog {
            if panic::catch_unwind(AssertUnwindSafe(|| subscriber(event))).is_err() {
                log::warn!(
                    "Event subscriber {:?} panicked while replaying {}",
                    id,
                    event.event_type
                );
            }
        }
        id
    }

    /// Subscribes a channel, for relays that consume events on their own
    /// thread (live UI, SSE, forwarders). The sender is dropped on
    /// unsubscribe, which disconnects the receiver.
    pub fn subscribe_channel(&self) -> (SubscriptionId, Receiver<RecognitionEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let id = self.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
        (id, rx)
    }

    /// Returns `true` when the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn unsubscribe_all(&self) {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Retained events, oldest first.
    pub fn snapshot(&self) -> Vec<RecognitionEvent> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::recognition_event::EventType;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::AtomicUsize;

    fn event(n: usize) -> RecognitionEvent {
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap();
        RecognitionEvent::new(EventType::FaceDetected, at, format!("event {n}"))
    }

    #[test]
    fn test_snapshot_keeps_most_recent_in_order() {
        let bus = EventBus::new(256);
        for n in 0..300 {
            bus.publish(event(n));
        }

        let snapshot = bus.snapshot();

        assert_eq!(snapshot.len(), 256);
        assert_eq!(snapshot[0].message, "event 44");
        assert_eq!(snapshot[255].message, "event 299");
        for (i, e) in snapshot.iter().enumerate() {
            assert_eq!(e.message, format!("event {}", i + 44));
        }
    }

    #[test]
    fn test_snapshot_below_capacity_returns_everything() {
        let bus = EventBus::default();
        bus.publish(event(1));
        bus.publish(event(2));
        assert_eq!(bus.snapshot().len(), 2);
        assert_eq!(bus.capacity(), 256);
    }

    #[test]
    fn test_subscribers_receive_events() {
        let bus = EventBus::default();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(event(1));
        bus.publish(event(2));

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let bus = EventBus::default();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(|_| panic!("subscriber failure"));
        let c = count.clone();
        bus.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(event(1));
        bus.publish(event(2));

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(bus.snapshot().len(), 2);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::default();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = bus.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(event(1));
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(event(2));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_late_subscriber_receives_history_then_live_events() {
        let bus = EventBus::default();
        bus.publish(event(1));
        bus.publish(event(2));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        bus.subscribe_with_history(move |e| s.lock().unwrap().push(e.message.clone()));
        bus.publish(event(3));

        assert_eq!(*seen.lock().unwrap(), ["event 1", "event 2", "event 3"]);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_history_replay_survives_panicking_subscriber() {
        let bus = EventBus::default();
        bus.publish(event(1));

        bus.subscribe_with_history(|_| panic!("subscriber failure"));
        bus.publish(event(2));

        assert_eq!(bus.snapshot().len(), 2);
    }

    #[test]
    fn test_channel_subscription() {
        let bus = EventBus::default();
        let (id, rx) = bus.subscribe_channel();

        bus.publish(event(1));
        assert_eq!(rx.try_recv().unwrap().message, "event 1");

        bus.unsubscribe(id);
        assert!(rx.recv().is_err());
    }

    #[test]
    fn test_subscriber_may_unsubscribe_itself() {
        let bus = Arc::new(EventBus::default());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let (b, s) = (bus.clone(), slot.clone());
        let id = bus.subscribe(move |_| {
            if let Some(id) = *s.lock().unwrap() {
                b.unsubscribe(id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        bus.publish(event(1));

        assert_eq!(bus.subscriber_count(), 0);
    }
}
