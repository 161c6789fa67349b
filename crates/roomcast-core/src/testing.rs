//! Test doubles for sinks and connections.

use crate::registry::Registry;
use crate::subscriber::{DeliveryError, EventSink};
use async_trait::async_trait;
use roomcast_transport::{Connection, ConnectionId, TransportError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Sink that records every frame it is given.
pub(crate) struct RecordingSink {
    tx: mpsc::UnboundedSender<Arc<str>>,
}

impl RecordingSink {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<Arc<str>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn send(&self, frame: Arc<str>) -> Result<(), DeliveryError> {
        self.tx.send(frame).map_err(|_| DeliveryError::Closed)
    }
}

/// Sink whose every send fails, counting attempts.
pub(crate) struct FailingSink {
    attempts: Arc<AtomicUsize>,
}

impl FailingSink {
    pub(crate) fn new() -> (Self, Arc<AtomicUsize>) {
        let attempts = Arc::new(AtomicUsize::new(0));
        (
            Self {
                attempts: attempts.clone(),
            },
            attempts,
        )
    }
}

#[async_trait]
impl EventSink for FailingSink {
    async fn send(&self, _frame: Arc<str>) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(DeliveryError::Other("broken pipe".into()))
    }
}

/// Sink that never completes a send.
pub(crate) struct StalledSink;

#[async_trait]
impl EventSink for StalledSink {
    async fn send(&self, _frame: Arc<str>) -> Result<(), DeliveryError> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// In-memory connection driven by a [`MockPeer`].
pub(crate) struct MockConnection {
    id: ConnectionId,
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<Arc<str>>,
    closed: Arc<AtomicBool>,
    stalled: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

/// The client side of a [`MockConnection`].
pub(crate) struct MockPeer {
    inbound: Option<mpsc::UnboundedSender<String>>,
    pub(crate) frames: mpsc::UnboundedReceiver<Arc<str>>,
    closed: Arc<AtomicBool>,
    stalled: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

pub(crate) fn mock_connection(id: &str) -> (MockConnection, MockPeer) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    let stalled = Arc::new(AtomicBool::new(false));
    let writes = Arc::new(AtomicUsize::new(0));

    (
        MockConnection {
            id: ConnectionId::new(id),
            inbound: inbound_rx,
            outbound: outbound_tx,
            closed: closed.clone(),
            stalled: stalled.clone(),
            writes: writes.clone(),
        },
        MockPeer {
            inbound: Some(inbound_tx),
            frames: outbound_rx,
            closed,
            stalled,
            writes,
        },
    )
}

impl MockPeer {
    /// Send text to the server side.
    pub(crate) fn say(&self, text: &str) {
        if let Some(tx) = &self.inbound {
            let _ = tx.send(text.to_string());
        }
    }

    /// Hang up, as a client closing its socket would.
    pub(crate) fn disconnect(&mut self) {
        self.inbound.take();
    }

    /// Stop reading, as a dead peer would: writes and close never complete.
    pub(crate) fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    /// Writes the server has started, including stalled ones.
    pub(crate) fn write_attempts(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Whether the server closed the connection.
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Next frame, waiting at most one second.
    pub(crate) async fn next_frame(&mut self) -> Option<Arc<str>> {
        tokio::time::timeout(Duration::from_secs(1), self.frames.recv())
            .await
            .ok()
            .flatten()
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        Ok(self.inbound.recv().await)
    }

    async fn send_text(&mut self, text: Arc<str>) -> Result<(), TransportError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        self.outbound
            .send(text)
            .map_err(|_| TransportError::SendFailed("peer gone".into()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Wait until `room` has exactly `expected` subscribers.
pub(crate) async fn wait_for_subscribers(registry: &Registry, room: &str, expected: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while registry.subscriber_count(room) != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscriber count never settled");
}
