//! Broadcast dispatch.
//!
//! Producers hand events to a bounded queue and return immediately. A
//! single worker drains the queue, so events reach each subscriber in the
//! order they were queued. Within one event every subscriber is sent to
//! concurrently and independently, each send bounded by `send_timeout`.

use crate::event::Event;
use crate::registry::Registry;
use crate::subscriber::DeliveryError;
use futures_util::future::join_all;
use roomcast_protocol::codec;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, trace, warn};

/// Default bound on a single subscriber send.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors returned to event producers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The queue is at capacity; the event was dropped.
    #[error("Dispatch queue full, event dropped")]
    QueueFull,

    /// The dispatch worker has stopped.
    #[error("Dispatch queue closed")]
    Closed,
}

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Upper bound on one subscriber send.
    pub send_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

/// What happened to one event.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Sends started.
    pub attempted: usize,
    /// Sends that completed.
    pub delivered: usize,
    /// Sends that failed or timed out.
    pub failed: usize,
    /// Subscribers this event caused to be cancelled.
    pub cancelled: usize,
    /// Subscribers skipped because they were already terminating.
    pub skipped: usize,
}

/// Routes events to the current subscribers of their room.
pub struct Dispatcher {
    registry: Arc<Registry>,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Create a dispatcher with default configuration.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_config(registry, DispatcherConfig::default())
    }

    /// Create a dispatcher with custom configuration.
    #[must_use]
    pub fn with_config(registry: Arc<Registry>, config: DispatcherConfig) -> Self {
        Self { registry, config }
    }

    /// Deliver one event to every live subscriber of its room.
    ///
    /// A failing subscriber never stops delivery to the others. It is
    /// cancelled, not unregistered: removal belongs to its lifecycle.
    pub async fn deliver(&self, event: &Event) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        let subscribers = self.registry.snapshot(event.room.as_str());
        if subscribers.is_empty() {
            trace!(room = %event.room, kind = event.kind(), "No subscribers");
            return outcome;
        }

        let frame: Arc<str> = match codec::encode(&event.payload) {
            Ok(text) => Arc::from(text),
            Err(e) => {
                error!(room = %event.room, kind = event.kind(), error = %e, "Failed to encode event");
                return outcome;
            }
        };

        let live: Vec<_> = subscribers
            .into_iter()
            .filter(|handle| {
                let terminating = handle.is_cancelled();
                if terminating {
                    outcome.skipped += 1;
                }
                !terminating
            })
            .collect();
        outcome.attempted = live.len();

        let timeout = self.config.send_timeout;
        let results = join_all(live.iter().map(|handle| {
            let frame = frame.clone();
            async move {
                match tokio::time::timeout(timeout, handle.send(frame)).await {
                    Ok(result) => result,
                    Err(_) => Err(DeliveryError::Timeout(timeout)),
                }
            }
        }))
        .await;

        for (handle, result) in live.iter().zip(results) {
            match result {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    outcome.failed += 1;
                    warn!(
                        room = %event.room,
                        subscriber = %handle.id(),
                        kind = event.kind(),
                        error = %e,
                        "Failed to send event to subscriber"
                    );
                    if handle.cancel() {
                        outcome.cancelled += 1;
                    }
                }
            }
        }

        debug!(
            room = %event.room,
            event = event.id,
            kind = event.kind(),
            message = event.payload.message_id(),
            delivered = outcome.delivered,
            failed = outcome.failed,
            "Dispatched"
        );

        outcome
    }

    /// Drain a dispatch queue until every [`DispatchHandle`] is dropped.
    pub async fn run(&self, receiver: DispatchReceiver) {
        self.run_with(receiver, |_, _| {}).await;
    }

    /// Like [`Dispatcher::run`], reporting each outcome to `observer`.
    pub async fn run_with<F>(&self, mut receiver: DispatchReceiver, mut observer: F)
    where
        F: FnMut(&Event, &DispatchOutcome),
    {
        while let Some(event) = receiver.rx.recv().await {
            let outcome = self.deliver(&event).await;
            observer(&event, &outcome);
        }
        debug!("Dispatch queue closed, worker exiting");
    }
}

/// Producer side of the dispatch queue.
#[derive(Debug, Clone)]
pub struct DispatchHandle {
    tx: mpsc::Sender<Event>,
}

/// Worker side of the dispatch queue.
#[derive(Debug)]
pub struct DispatchReceiver {
    rx: mpsc::Receiver<Event>,
}

/// Create a bounded dispatch queue.
#[must_use]
pub fn dispatch_queue(capacity: usize) -> (DispatchHandle, DispatchReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (DispatchHandle { tx }, DispatchReceiver { rx })
}

impl DispatchHandle {
    /// Queue an event for delivery without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::QueueFull`] if the queue is at capacity
    /// (the event is dropped) or [`DispatchError::Closed`] if the worker
    /// is gone.
    pub fn dispatch(&self, event: Event) -> Result<(), DispatchError> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => {
                warn!(room = %event.room, kind = event.kind(), "Dispatch queue full, dropping event");
                Err(DispatchError::QueueFull)
            }
            Err(TrySendError::Closed(event)) => {
                warn!(room = %event.room, kind = event.kind(), "Dispatch queue closed, dropping event");
                Err(DispatchError::Closed)
            }
        }
    }
}
