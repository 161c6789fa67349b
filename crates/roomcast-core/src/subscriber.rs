//! Subscriber handles.
//!
//! A handle is a live connection's registration token within a room. It
//! carries two capabilities: a sink the dispatcher pushes encoded frames
//! into, and a cancellation signal that tells the owning connection to
//! shut down.

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

static SUBSCRIBER_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique subscriber identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Allocate the next identifier.
    #[must_use]
    pub fn next() -> Self {
        Self(SUBSCRIBER_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw numeric value.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

/// Why a frame could not be handed to a subscriber.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The receiving side of the subscriber is gone.
    #[error("Subscriber closed")]
    Closed,

    /// The send did not complete within the configured bound.
    #[error("Send timed out after {0:?}")]
    Timeout(Duration),

    /// Sink-specific failure.
    #[error("{0}")]
    Other(String),
}

/// The send capability of a subscriber.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Push one encoded frame towards the subscriber.
    ///
    /// May wait while the subscriber is slow; callers bound the wait.
    async fn send(&self, frame: Arc<str>) -> Result<(), DeliveryError>;
}

/// Sink backed by the connection's bounded outbound queue.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Arc<str>>,
}

impl ChannelSink {
    /// Wrap the sending half of an outbound queue.
    #[must_use]
    pub fn new(tx: mpsc::Sender<Arc<str>>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn send(&self, frame: Arc<str>) -> Result<(), DeliveryError> {
        self.tx.send(frame).await.map_err(|_| DeliveryError::Closed)
    }
}

/// A live subscriber of exactly one room.
pub struct SubscriberHandle {
    id: SubscriberId,
    sink: Box<dyn EventSink>,
    token: CancellationToken,
    cancelled: AtomicBool,
}

impl SubscriberHandle {
    /// Create a handle with a fresh identifier.
    #[must_use]
    pub fn new(sink: impl EventSink + 'static, token: CancellationToken) -> Self {
        Self {
            id: SubscriberId::next(),
            sink: Box::new(sink),
            token,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Get the subscriber ID.
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Push a frame through the send capability.
    ///
    /// # Errors
    ///
    /// Returns the sink's error if the frame could not be handed over.
    pub async fn send(&self, frame: Arc<str>) -> Result<(), DeliveryError> {
        self.sink.send(frame).await
    }

    /// Signal the owning connection to terminate.
    ///
    /// Safe to call any number of times from any task. Returns `true` only
    /// for the call that actually raised the signal.
    pub fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.token.cancel();
        true
    }

    /// Whether the connection has been told to terminate, either through
    /// this handle or by a server-wide shutdown.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire) || self.token.is_cancelled()
    }

    /// Wait until the handle is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}

impl fmt::Debug for SubscriberHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberHandle")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
