//! Debounced Checkpoint Emission
//!
//! Trailing-edge debouncer: the first call in a window arms a timer, calls
//! during the window overwrite the pending value, and the timer fires the
//! latest value. At most one checkpoint event goes out per window, and an
//! emission must strictly advance `block_timestamp` over the last one.

use crate::events::{EventChannel, SyncEvent};
use crate::types::Checkpoint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct DebounceSlot {
    pending: Option<Checkpoint>,
    last_emitted_timestamp: Option<u64>,
}

#[derive(Debug, Clone)]
pub(crate) struct CheckpointDebouncer {
    window: Duration,
    slot: Arc<Mutex<DebounceSlot>>,
    armed: Arc<AtomicBool>,
    events: EventChannel,
}

impl CheckpointDebouncer {
    pub(crate) fn new(window: Duration, events: EventChannel) -> Self {
        Self {
            window,
            slot: Arc::new(Mutex::new(DebounceSlot::default())),
            armed: Arc::new(AtomicBool::new(false)),
            events,
        }
    }

    /// Records `checkpoint` as the latest value and arms the emission timer
    /// if it is not already armed.
    pub(crate) fn call(&self, checkpoint: Checkpoint) {
        self.slot
            .lock()
            .expect("debounce slot lock poisoned")
            .pending = Some(checkpoint);

        if !self.armed.swap(true, Ordering::AcqRel) {
            let window = self.window;
            let slot = Arc::clone(&self.slot);
            let armed = Arc::clone(&self.armed);
            let events = self.events.clone();

            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                // Disarm before draining: a call landing after the drain
                // arms a fresh window instead of being dropped.
                armed.store(false, Ordering::Release);

                let emit = {
                    let mut slot = slot.lock().expect("debounce slot lock poisoned");
                    match slot.pending.take() {
                        Some(cp)
                            if slot
                                .last_emitted_timestamp
                                .map_or(true, |last| cp.block_timestamp > last) =>
                        {
                            slot.last_emitted_timestamp = Some(cp.block_timestamp);
                            Some(cp)
                        }
                        _ => None,
                    }
                };
                if let Some(cp) = emit {
                    events.send(SyncEvent::Checkpoint(cp));
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(block_number: u64, block_timestamp: u64) -> Checkpoint {
        Checkpoint {
            block_timestamp,
            chain_id: 1,
            block_number,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn emits_latest_value_once_per_window() {
        let events = EventChannel::new();
        let mut rx = events.subscribe();
        let debouncer = CheckpointDebouncer::new(Duration::from_millis(500), events);

        debouncer.call(checkpoint(10, 1_010));
        debouncer.call(checkpoint(20, 1_020));
        debouncer.call(checkpoint(30, 1_030));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(
            rx.try_recv().unwrap(),
            SyncEvent::Checkpoint(checkpoint(30, 1_030))
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn window_reopens_after_emission() {
        let events = EventChannel::new();
        let mut rx = events.subscribe();
        let debouncer = CheckpointDebouncer::new(Duration::from_millis(500), events);

        debouncer.call(checkpoint(10, 1_010));
        tokio::time::sleep(Duration::from_millis(600)).await;
        debouncer.call(checkpoint(20, 1_020));
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(
            rx.try_recv().unwrap(),
            SyncEvent::Checkpoint(checkpoint(10, 1_010))
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            SyncEvent::Checkpoint(checkpoint(20, 1_020))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn never_regresses_in_timestamp() {
        let events = EventChannel::new();
        let mut rx = events.subscribe();
        let debouncer = CheckpointDebouncer::new(Duration::from_millis(500), events);

        debouncer.call(checkpoint(10, 1_010));
        tokio::time::sleep(Duration::from_millis(600)).await;
        // Same timestamp again: suppressed.
        debouncer.call(checkpoint(11, 1_010));
        tokio::time::sleep(Duration::from_millis(600)).await;
        debouncer.call(checkpoint(12, 1_012));
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(
            rx.try_recv().unwrap(),
            SyncEvent::Checkpoint(checkpoint(10, 1_010))
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            SyncEvent::Checkpoint(checkpoint(12, 1_012))
        );
        assert!(rx.try_recv().is_err());
    }
}
