//! Sync Event Channel
//!
//! Typed events the orchestrator publishes for downstream consumers. Events
//! go out over a broadcast channel; subscribing is cheap and late subscribers
//! only miss events sent before they subscribed.

use crate::types::Checkpoint;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 1_024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// All historical work for every source has been fetched and persisted.
    /// Emitted exactly once per run, never after `kill`.
    SyncComplete,
    /// Data is durable for every source up to this block. Debounced and
    /// strictly increasing in `block_timestamp`.
    Checkpoint(Checkpoint),
}

/// Publishing side of the event channel.
#[derive(Debug, Clone)]
pub(crate) struct EventChannel {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventChannel {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Sends an event. A send with no live subscribers is not an error.
    pub(crate) fn send(&self, event: SyncEvent) {
        let _ = self.sender.send(event);
    }
}
