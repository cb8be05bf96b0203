//! MessageBus - typed fan-out with per-subscriber drop-oldest buffering
//!
//! Two kinds of consumers:
//!
//! - **Handlers** run synchronously on the publishing thread, in registration
//!   order, before any subscriber is offered the event.
//! - **Subscribers** each own a bounded queue. When it is full the oldest
//!   undelivered event is evicted; `publish` never blocks.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::{debug, error};

use super::types::Event;

/// Default per-subscriber buffer (events)
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 15;

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Identifies a registered synchronous handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct QueueState {
    events: VecDeque<Event>,
    closed: bool,
}

struct SubscriberQueue {
    id: u64,
    capacity: usize,
    state: Mutex<QueueState>,
    dropped: AtomicU64,
    notify: Notify,
}

impl SubscriberQueue {
    fn offer(&self, event: Event) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        if state.events.len() >= self.capacity {
            state.events.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        state.events.push_back(event);
        drop(state);
        self.notify.notify_one();
    }

    fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_one();
    }
}

struct BusInner {
    capacity: usize,
    next_id: AtomicU64,
    handlers: RwLock<Vec<(HandlerId, Handler)>>,
    subscribers: Mutex<Vec<Arc<SubscriberQueue>>>,
}

impl BusInner {
    fn remove_subscriber(&self, id: u64) -> Option<Arc<SubscriberQueue>> {
        let mut subscribers = self.subscribers.lock();
        let pos = subscribers.iter().position(|q| q.id == id)?;
        Some(subscribers.remove(pos))
    }
}

impl Drop for BusInner {
    fn drop(&mut self) {
        for queue in self.subscribers.get_mut().drain(..) {
            queue.close();
        }
    }
}

/// Central event bus
///
/// Cheap to clone; all clones share handlers and subscribers.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    /// Create a bus whose subscribers buffer up to `capacity` events each
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "MessageBus::new: creating message bus");
        Self {
            inner: Arc::new(BusInner {
                capacity: capacity.max(1),
                next_id: AtomicU64::new(1),
                handlers: RwLock::new(Vec::new()),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Deliver an event to all handlers, then to all subscribers
    pub fn publish(&self, event: Event) {
        debug!(event_type = event.event_type(), "MessageBus::publish");

        let handlers: Vec<(HandlerId, Handler)> = self.inner.handlers.read().clone();
        for (id, handler) in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                error!(handler_id = id.0, event_type = event.event_type(), "MessageBus: handler panicked");
            }
        }

        let subscribers: Vec<Arc<SubscriberQueue>> = self.inner.subscribers.lock().clone();
        for queue in subscribers {
            queue.offer(event.clone());
        }
    }

    /// Register a handler that runs on the publishing thread
    pub fn register_handler<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = HandlerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(handler_id = id.0, "MessageBus::register_handler");
        self.inner.handlers.write().push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler; returns false if it was not registered
    pub fn unregister_handler(&self, id: HandlerId) -> bool {
        debug!(handler_id = id.0, "MessageBus::unregister_handler");
        let mut handlers = self.inner.handlers.write();
        let before = handlers.len();
        handlers.retain(|(h, _)| *h != id);
        handlers.len() != before
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(subscriber_id = id, "MessageBus::subscribe: new subscriber");
        let queue = Arc::new(SubscriberQueue {
            id,
            capacity: self.inner.capacity,
            state: Mutex::new(QueueState {
                events: VecDeque::with_capacity(self.inner.capacity),
                closed: false,
            }),
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
        });
        self.inner.subscribers.lock().push(Arc::clone(&queue));
        Subscription {
            queue,
            bus: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    pub fn handler_count(&self) -> usize {
        self.inner.handlers.read().len()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Receiving end of one subscriber queue
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription {
    queue: Arc<SubscriberQueue>,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Wait for the next event
    ///
    /// Returns `None` once the bus is gone or the subscription was closed and
    /// every buffered event has been taken.
    pub async fn recv(&self) -> Option<Event> {
        loop {
            let notified = self.queue.notify.notified();
            {
                let mut state = self.queue.state.lock();
                if let Some(event) = state.events.pop_front() {
                    return Some(event);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Take the next buffered event without waiting
    pub fn try_recv(&self) -> Option<Event> {
        self.queue.state.lock().events.pop_front()
    }

    /// Number of buffered events
    pub fn len(&self) -> usize {
        self.queue.state.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events evicted from this subscriber's buffer so far
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    /// Stop receiving; buffered events are discarded
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        debug!(subscriber_id = self.queue.id, "Subscription::drop: unsubscribing");
        if let Some(bus) = self.bus.upgrade() {
            bus.remove_subscriber(self.queue.id);
        }
        self.queue.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::DeployPhase;
    use proptest::prelude::*;
    use std::time::Duration;

    fn option_event(n: usize) -> Event {
        Event::OptionChanged {
            name: format!("opt{n}"),
            value: true,
        }
    }

    #[test]
    fn test_subscribe_receives_only_new_events() {
        let bus = MessageBus::with_default_capacity();
        bus.publish(option_event(0));
        let sub = bus.subscribe();
        bus.publish(option_event(1));

        assert_eq!(sub.try_recv(), Some(option_event(1)));
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = MessageBus::with_default_capacity();
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        sub.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(option_event(0));
    }

    #[test]
    fn test_drop_oldest_at_capacity() {
        let bus = MessageBus::new(15);
        let sub = bus.subscribe();
        for n in 0..20 {
            bus.publish(option_event(n));
        }

        assert_eq!(sub.len(), 15);
        assert_eq!(sub.dropped(), 5);
        for n in 5..20 {
            assert_eq!(sub.try_recv(), Some(option_event(n)));
        }
    }

    #[test]
    fn test_slow_subscriber_does_not_affect_others() {
        let bus = MessageBus::new(2);
        let slow = bus.subscribe();
        let fast = bus.subscribe();
        for n in 0..4 {
            bus.publish(option_event(n));
            assert_eq!(fast.try_recv(), Some(option_event(n)));
        }
        assert_eq!(slow.dropped(), 2);
        assert_eq!(fast.dropped(), 0);
        assert_eq!(slow.try_recv(), Some(option_event(2)));
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let bus = MessageBus::with_default_capacity();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s1 = Arc::clone(&seen);
        bus.register_handler(move |_| s1.lock().push("first"));
        let s2 = Arc::clone(&seen);
        bus.register_handler(move |_| s2.lock().push("second"));

        bus.publish(option_event(0));
        assert_eq!(*seen.lock(), vec!["first", "second"]);
    }

    #[test]
    fn test_handler_sees_event_before_subscriber() {
        let bus = MessageBus::with_default_capacity();
        let sub = Arc::new(bus.subscribe());
        let observed_len = Arc::new(Mutex::new(None));

        let sub_in_handler = Arc::clone(&sub);
        let observed = Arc::clone(&observed_len);
        bus.register_handler(move |_| *observed.lock() = Some(sub_in_handler.len()));

        bus.publish(option_event(0));
        assert_eq!(*observed_len.lock(), Some(0));
        assert_eq!(sub.len(), 1);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let bus = MessageBus::with_default_capacity();
        let sub = bus.subscribe();
        bus.register_handler(|_| panic!("handler failure"));
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        bus.register_handler(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(option_event(0));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(sub.try_recv(), Some(option_event(0)));
    }

    #[test]
    fn test_unregister_handler() {
        let bus = MessageBus::with_default_capacity();
        let id = bus.register_handler(|_| {});
        assert_eq!(bus.handler_count(), 1);
        assert!(bus.unregister_handler(id));
        assert!(!bus.unregister_handler(id));
        assert_eq!(bus.handler_count(), 0);
    }

    #[tokio::test]
    async fn test_recv_wakes_on_publish() {
        let bus = MessageBus::with_default_capacity();
        let sub = bus.subscribe();
        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish(Event::DeployStateChanged {
                phase: DeployPhase::Start,
            });
        });

        let event = tokio::time::timeout(Duration::from_secs(2), sub.recv()).await.unwrap();
        assert_eq!(
            event,
            Some(Event::DeployStateChanged {
                phase: DeployPhase::Start
            })
        );
    }

    #[tokio::test]
    async fn test_recv_returns_none_when_bus_dropped() {
        let bus = MessageBus::with_default_capacity();
        let sub = bus.subscribe();
        bus.publish(option_event(0));
        drop(bus);

        assert_eq!(sub.recv().await, Some(option_event(0)));
        assert_eq!(sub.recv().await, None);
    }

    proptest! {
        #[test]
        fn prop_keeps_most_recent_in_order(capacity in 1usize..32, published in 0usize..100) {
            let bus = MessageBus::new(capacity);
            let sub = bus.subscribe();
            for n in 0..published {
                bus.publish(option_event(n));
            }

            let kept = published.min(capacity);
            prop_assert_eq!(sub.dropped(), (published - kept) as u64);
            let received: Vec<Event> = std::iter::from_fn(|| sub.try_recv()).collect();
            let expected: Vec<Event> = (published - kept..published).map(option_event).collect();
            prop_assert_eq!(received, expected);
        }
    }
}
