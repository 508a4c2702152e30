//! Live-update delivery
//!
//! - Event model: immutable state-change notifications with a closed kind set
//! - Broker: bounded per-subscriber queues, non-blocking fan-out, resync on overflow

mod broker;
mod event;

pub use broker::{LiveBroker, SubscriberQueue, DEFAULT_QUEUE_CAPACITY};
pub use event::{CalendarDeletedPayload, ConnectedPayload, LiveEvent, LiveEventKind};
