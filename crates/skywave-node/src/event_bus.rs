//! Fire-and-forget event delivery.
//!
//! Producers publish into a bounded queue; one dispatch worker drains it
//! and fans out to registered observers. When the queue is full the event
//! is dropped and counted — the RF path never blocks on a slow observer.
//! Observer panics are caught and reported, never propagated.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use skywave_core::{Event, EventObserver};
use tokio::sync::mpsc;

/// Publishing half of the event bus. Cloneable and cheap.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<Event>,
    dropped: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a bus and its dispatch worker.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, EventDispatcher) {
        let (tx, rx) = mpsc::channel(capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        (
            Self { tx, dropped: Arc::clone(&dropped) },
            EventDispatcher { rx, observers: Vec::new(), dropped },
        )
    }

    /// Publish an event. Never blocks; a full queue drops the event.
    pub fn publish(&self, event: Event) {
        if let Err(error) = self.tx.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%error, "event queue full, dropping event");
        }
    }

    /// Events dropped so far due to backpressure.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Dispatch worker: owns the observer list and the queue's receiving half.
pub struct EventDispatcher {
    rx: mpsc::Receiver<Event>,
    observers: Vec<Box<dyn EventObserver>>,
    dropped: Arc<AtomicU64>,
}

impl EventDispatcher {
    /// Register an observer. Call before [`EventDispatcher::run`].
    pub fn register(&mut self, observer: Box<dyn EventObserver>) {
        self.observers.push(observer);
    }

    /// Drain the queue until every publisher is gone.
    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            for observer in &self.observers {
                let result = catch_unwind(AssertUnwindSafe(|| observer.on_event(&event)));
                if result.is_err() {
                    tracing::warn!(event = event.name(), "observer panicked; isolated");
                }
            }
        }
        let dropped = self.dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            tracing::info!(dropped, "event bus drained; some events were shed under load");
        }
    }
}

/// Default observer: one log line per event.
pub struct LogObserver;

impl EventObserver for LogObserver {
    fn on_event(&self, event: &Event) {
        match event {
            Event::MessageSent { channel, seqno, .. } => {
                tracing::info!(%channel, seqno, "message sent");
            },
            Event::MessageReceived { channel, origin, seqno, nick, .. } => {
                tracing::info!(%channel, %origin, seqno, %nick, "message received");
            },
            Event::MessageStored { channel, origin, seqno } => {
                tracing::debug!(%channel, %origin, seqno, "message stored");
            },
            Event::GapDetected { channel, origin, start, end } => {
                tracing::info!(%channel, %origin, start, end, "gap confirmed");
            },
            Event::SyncApplied { channel, applied_count } => {
                tracing::info!(%channel, applied_count, "sync applied");
            },
            Event::PruneExecuted { removed_rows } => {
                tracing::info!(removed_rows, "retention prune executed");
            },
            Event::LinkStateChange { link, state } => {
                tracing::info!(%link, ?state, "link state changed");
            },
        }
    }
}
