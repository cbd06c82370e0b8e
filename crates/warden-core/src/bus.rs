//! In-process event bus

use tokio::sync::broadcast;
use tracing::debug;
use warden_api::{Event, EventPayload};

const DEFAULT_CAPACITY: usize = 100;

/// Best-effort broadcast of state-change events
///
/// Publishing never blocks and never fails; subscribers that fall behind
/// lose the oldest events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, payload: EventPayload) {
        let name = payload.name();
        let delivered = self.tx.send(Event::new(payload)).unwrap_or(0);
        debug!(event = name, delivered, "Event published");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
