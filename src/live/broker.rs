//! In-process publish/subscribe hub
//!
//! One bounded queue per (connection, channel). Publishing never blocks:
//! request handlers hand events to the delivery task over an unbounded mpsc
//! channel, and the delivery task alone touches subscriber queues. When the
//! delivery task is not attached (server starting up or torn down) publish
//! is a no-op — events with nothing to deliver to are allowed to be lost.
//!
//! A queue that overflows gets drained and replaced with a single
//! `system.resync_required` marker; the subscriber must refetch
//! authoritative state out-of-band. Other queues on the channel are
//! unaffected.

use crate::live::event::LiveEvent;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::futures::Notified;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_QUEUE_CAPACITY: usize = 200;

/// A bounded, ordered buffer of pending events, owned by exactly one
/// connection for exactly one channel.
pub struct SubscriberQueue {
    id: Uuid,
    capacity: usize,
    events: Mutex<VecDeque<LiveEvent>>,
    notify: Notify,
}

impl SubscriberQueue {
    fn new(capacity: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity.min(16))),
            notify: Notify::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Enqueue without blocking. On overflow, discard everything buffered
    /// and leave a single resync marker; if even that does not fit the
    /// event is dropped silently.
    fn push_or_resync(&self, event: &LiveEvent) {
        let mut events = self.events.lock();
        if events.len() < self.capacity {
            events.push_back(event.clone());
        } else {
            events.clear();
            let resync = LiveEvent::resync(event.project_id, event.calendar_id, event.entity_id);
            if events.len() < self.capacity {
                events.push_back(resync);
            }
        }
        drop(events);
        self.notify.notify_one();
    }

    /// Pop the next pending event, if any.
    pub fn try_recv(&self) -> Option<LiveEvent> {
        self.events.lock().pop_front()
    }

    /// Wait until the next pending event. FIFO per queue.
    pub async fn recv(&self) -> LiveEvent {
        loop {
            if let Some(event) = self.try_recv() {
                return event;
            }
            self.notify.notified().await;
        }
    }

    /// A future resolving on the next enqueue; used to multiplex several
    /// queues from one connection task.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

/// Process-wide live-update hub. Shared between request handlers (publish)
/// and streaming connections (subscribe/drain); the only shared mutable
/// structure in the system.
pub struct LiveBroker {
    subscriptions: DashMap<String, HashMap<Uuid, Arc<SubscriberQueue>>>,
    delivery: RwLock<Option<mpsc::UnboundedSender<(String, LiveEvent)>>>,
    queue_capacity: usize,
}

impl LiveBroker {
    pub fn new(queue_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            subscriptions: DashMap::new(),
            delivery: RwLock::new(None),
            queue_capacity,
        })
    }

    /// Spawn the delivery task and attach publishers to it. Publishes made
    /// before this (or after the task exits) are dropped.
    pub fn start_delivery(self: &Arc<Self>) -> JoinHandle<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<(String, LiveEvent)>();
        *self.delivery.write() = Some(tx);

        let broker = Arc::clone(self);
        tokio::spawn(async move {
            while let Some((channel, event)) = rx.recv().await {
                broker.fan_out(&channel, &event);
            }
        })
    }

    /// Register a new bounded queue under `channel`.
    pub fn subscribe(&self, channel: &str) -> Arc<SubscriberQueue> {
        let queue = Arc::new(SubscriberQueue::new(self.queue_capacity));
        self.subscriptions
            .entry(channel.to_string())
            .or_default()
            .insert(queue.id, Arc::clone(&queue));
        queue
    }

    /// Deregister a queue; the channel entry is pruned once empty.
    pub fn unsubscribe(&self, channel: &str, queue: &SubscriberQueue) {
        if let Some(mut entry) = self.subscriptions.get_mut(channel) {
            entry.remove(&queue.id);
            let empty = entry.is_empty();
            drop(entry);
            if empty {
                self.subscriptions
                    .remove_if(channel, |_, queues| queues.is_empty());
            }
        }
    }

    /// Fire-and-forget publish from any execution context. Never blocks,
    /// never fails the caller.
    pub fn publish(&self, channel: &str, event: LiveEvent) {
        let sender = self.delivery.read().clone();
        let Some(sender) = sender else {
            debug!(channel, "Publish with no delivery task attached, dropping");
            return;
        };
        if sender.send((channel.to_string(), event)).is_err() {
            // Delivery task is gone; detach so later publishes short-circuit.
            *self.delivery.write() = None;
        }
    }

    fn fan_out(&self, channel: &str, event: &LiveEvent) {
        let Some(queues) = self.subscriptions.get(channel) else {
            return;
        };
        debug!(channel, subscriber_count = queues.len(), "Fanning out event");
        for queue in queues.values() {
            queue.push_or_resync(event);
        }
    }

    /// Number of queues currently registered on a channel.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.subscriptions
            .get(channel)
            .map(|queues| queues.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::event::LiveEventKind;
    use chrono::Utc;

    fn event(project_id: Uuid, n: u64) -> LiveEvent {
        LiveEvent::new(
            project_id,
            None,
            Uuid::new_v4(),
            LiveEventKind::EntryCreated(serde_json::json!({ "n": n })),
            Utc::now(),
        )
    }

    #[test]
    fn test_queue_fifo() {
        let queue = SubscriberQueue::new(10);
        let project_id = Uuid::new_v4();
        for n in 0..3 {
            queue.push_or_resync(&event(project_id, n));
        }
        for n in 0..3 {
            let got = queue.try_recv().unwrap();
            assert_eq!(
                got.kind,
                LiveEventKind::EntryCreated(serde_json::json!({ "n": n }))
            );
        }
        assert!(queue.try_recv().is_none());
    }

    #[test]
    fn test_queue_overflow_leaves_single_resync() {
        let queue = SubscriberQueue::new(3);
        let project_id = Uuid::new_v4();
        for n in 0..10 {
            queue.push_or_resync(&event(project_id, n));
        }
        // 3 buffered, 4th overflowed: cleared + resync, then 3, 4 more
        // pushed on top until full again, overflow again...
        let mut kinds = Vec::new();
        while let Some(e) = queue.try_recv() {
            kinds.push(e.kind);
        }
        assert!(kinds.len() <= 3);
        assert_eq!(
            kinds.iter().filter(|k| **k == LiveEventKind::ResyncRequired).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_publish_without_delivery_task_is_noop() {
        let broker = LiveBroker::new(8);
        let project_id = Uuid::new_v4();
        let queue = broker.subscribe("project-events:test");

        broker.publish("project-events:test", event(project_id, 1));
        // No delivery task attached: nothing reaches the queue.
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_fan_out_reaches_all_subscribers() {
        let broker = LiveBroker::new(8);
        broker.start_delivery();
        let project_id = Uuid::new_v4();

        let a = broker.subscribe("calendar:x");
        let b = broker.subscribe("calendar:x");
        let other = broker.subscribe("calendar:y");

        broker.publish("calendar:x", event(project_id, 7));

        let got_a = a.recv().await;
        let got_b = b.recv().await;
        assert_eq!(got_a.kind, got_b.kind);
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_prunes_channel() {
        let broker = LiveBroker::new(8);
        let queue = broker.subscribe("calendar:z");
        assert_eq!(broker.subscriber_count("calendar:z"), 1);
        broker.unsubscribe("calendar:z", &queue);
        assert_eq!(broker.subscriber_count("calendar:z"), 0);
        assert!(broker.subscriptions.get("calendar:z").is_none());
    }
}
