//! Connection lifecycle management.
//!
//! Every accepted connection walks `Connecting → Subscribed → Terminating →
//! Closed`. Registration happens on entering `Subscribed` and is undone on
//! the way out, whatever ended the connection.

use crate::event::RoomId;
use crate::registry::{Registry, RegistryError};
use crate::subscriber::{ChannelSink, SubscriberHandle, SubscriberId};
use roomcast_transport::{Connection, ConnectionId};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Lifecycle errors. All of them happen before the connection subscribes.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The server is shutting down and accepts no new subscribers.
    #[error("Server is shutting down")]
    ShuttingDown,

    /// The subscriber could not be registered.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Per-connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Connecting,
    Subscribed,
    Terminating,
    Closed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Terminating => "terminating",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why a subscribed connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client hung up.
    ClientClosed,
    /// Reading from or writing to the connection failed.
    TransportError,
    /// A failed dispatch cancelled the subscriber.
    Cancelled,
    /// The server is shutting down.
    Shutdown,
}

/// Upper bound on sending the close frame to a peer that may be gone.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Lifecycle configuration.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Frames buffered per connection before dispatch sends start waiting.
    pub outbound_buffer: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self { outbound_buffer: 64 }
    }
}

/// Unregisters on drop so no exit path can leave a stale handle behind.
struct Registration<'a> {
    registry: &'a Registry,
    room: &'a RoomId,
    subscriber: SubscriberId,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.registry.unregister(self.room, self.subscriber);
    }
}

/// Owns the per-connection subscribe loop.
pub struct Lifecycle {
    registry: Arc<Registry>,
    shutdown: CancellationToken,
    config: LifecycleConfig,
}

impl Lifecycle {
    /// Create a lifecycle manager with its own shutdown signal.
    #[must_use]
    pub fn new(registry: Arc<Registry>, config: LifecycleConfig) -> Self {
        Self::with_shutdown(registry, config, CancellationToken::new())
    }

    /// Create a lifecycle manager tied to an existing shutdown signal.
    #[must_use]
    pub fn with_shutdown(
        registry: Arc<Registry>,
        config: LifecycleConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            shutdown,
            config,
        }
    }

    /// The registry connections register into.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Terminate every live connection and refuse new ones.
    pub fn shutdown(&self) {
        info!(
            subscribers = self.registry.stats().subscriber_count,
            "Shutting down live connections"
        );
        self.shutdown.cancel();
    }

    fn cancel_reason(&self) -> CloseReason {
        if self.shutdown.is_cancelled() {
            CloseReason::Shutdown
        } else {
            CloseReason::Cancelled
        }
    }

    /// Whether [`Lifecycle::shutdown`] has been called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Run a connection subscribed to `room` until it ends.
    ///
    /// The room is assumed to exist; callers validate it first.
    ///
    /// # Errors
    ///
    /// Returns an error, without ever registering, if the connection cannot
    /// be subscribed. Anything that goes wrong afterwards is reported as a
    /// [`CloseReason`].
    pub async fn accept<C: Connection>(
        &self,
        mut conn: C,
        room: RoomId,
    ) -> Result<CloseReason, LifecycleError> {
        let connection = conn.id().clone();
        transition(&connection, &room, LifecycleState::Connecting);

        if self.shutdown.is_cancelled() {
            close(&mut conn).await;
            return Err(LifecycleError::ShuttingDown);
        }

        let (tx, mut outbound) = mpsc::channel(self.config.outbound_buffer.max(1));
        let handle = Arc::new(SubscriberHandle::new(
            ChannelSink::new(tx),
            self.shutdown.child_token(),
        ));
        let subscriber = handle.id();

        if let Err(e) = self.registry.register(&room, handle.clone()) {
            warn!(connection = %connection, room = %room, error = %e, "Failed to register subscriber");
            close(&mut conn).await;
            return Err(e.into());
        }
        let registration = Registration {
            registry: &self.registry,
            room: &room,
            subscriber,
        };

        transition(&connection, &room, LifecycleState::Subscribed);
        info!(
            room = %room,
            connection = %connection,
            subscriber = %subscriber,
            client = conn.remote_addr().as_deref().unwrap_or("unknown"),
            "New client connected"
        );

        let reason = loop {
            tokio::select! {
                biased;

                () = handle.cancelled() => break self.cancel_reason(),

                Some(frame) = outbound.recv() => {
                    // A peer that stops reading must not outlive its cancellation
                    tokio::select! {
                        biased;

                        () = handle.cancelled() => break self.cancel_reason(),

                        written = conn.send_text(frame) => {
                            if let Err(e) = written {
                                debug!(connection = %connection, error = %e, "Failed to write frame");
                                break CloseReason::TransportError;
                            }
                        }
                    }
                }

                inbound = conn.recv() => match inbound {
                    Ok(Some(text)) => {
                        trace!(connection = %connection, bytes = text.len(), "Ignoring inbound text");
                    }
                    Ok(None) => break CloseReason::ClientClosed,
                    Err(e) => {
                        debug!(connection = %connection, error = %e, "Connection read failed");
                        break CloseReason::TransportError;
                    }
                },
            }
        };

        transition(&connection, &room, LifecycleState::Terminating);
        drop(registration);
        handle.cancel();
        drop(outbound);
        close(&mut conn).await;

        transition(&connection, &room, LifecycleState::Closed);
        info!(
            room = %room,
            connection = %connection,
            subscriber = %subscriber,
            reason = ?reason,
            "Client disconnected"
        );

        Ok(reason)
    }
}

fn transition(connection: &ConnectionId, room: &RoomId, state: LifecycleState) {
    debug!(connection = %connection, room = %room, state = %state, "Lifecycle transition");
}

async fn close<C: Connection>(conn: &mut C) {
    match tokio::time::timeout(CLOSE_TIMEOUT, conn.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            trace!(connection = %conn.id(), error = %e, "Close after disconnect failed");
        }
        Err(_) => {
            debug!(connection = %conn.id(), "Close timed out, dropping connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{dispatch_queue, Dispatcher, DispatcherConfig};
    use crate::event::Event;
    use crate::testing::{mock_connection, wait_for_subscribers, MockPeer};
    use std::time::Duration;
    use roomcast_protocol::EventPayload;

    fn lifecycle() -> Arc<Lifecycle> {
        Arc::new(Lifecycle::new(
            Arc::new(Registry::new()),
            LifecycleConfig::default(),
        ))
    }

    async fn wait_for_write(peer: &MockPeer) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while peer.write_attempts() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("no write started");
    }

    #[tokio::test]
    async fn test_registers_and_unregisters() {
        let lifecycle = lifecycle();
        let (conn, mut peer) = mock_connection("c1");

        let task = tokio::spawn({
            let lifecycle = lifecycle.clone();
            async move { lifecycle.accept(conn, RoomId::new("r1")).await }
        });

        wait_for_subscribers(lifecycle.registry(), "r1", 1).await;

        peer.say("ignored");
        peer.disconnect();

        let reason = task.await.unwrap().unwrap();
        assert_eq!(reason, CloseReason::ClientClosed);
        assert_eq!(lifecycle.registry().subscriber_count("r1"), 0);
        assert_eq!(lifecycle.registry().stats().subscriber_count, 0);
        assert!(peer.is_closed());
    }

    #[tokio::test]
    async fn test_cancellation_terminates() {
        let lifecycle = lifecycle();
        let (conn, _peer) = mock_connection("c1");

        let task = tokio::spawn({
            let lifecycle = lifecycle.clone();
            async move { lifecycle.accept(conn, RoomId::new("r1")).await }
        });

        wait_for_subscribers(lifecycle.registry(), "r1", 1).await;
        let handle = lifecycle.registry().snapshot("r1").remove(0);
        assert!(handle.cancel());

        assert_eq!(task.await.unwrap().unwrap(), CloseReason::Cancelled);
        assert!(lifecycle.registry().snapshot("r1").is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_terminates_all() {
        let lifecycle = lifecycle();
        let mut tasks = Vec::new();
        let mut peers = Vec::new();
        for i in 0..3 {
            let (conn, peer) = mock_connection(&format!("c{i}"));
            peers.push(peer);
            let lifecycle = lifecycle.clone();
            tasks.push(tokio::spawn(async move {
                lifecycle.accept(conn, RoomId::new("r1")).await
            }));
        }

        wait_for_subscribers(lifecycle.registry(), "r1", 3).await;
        lifecycle.shutdown();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), CloseReason::Shutdown);
        }
        assert_eq!(lifecycle.registry().stats().room_count, 0);

        let (conn, _peer) = mock_connection("late");
        assert!(matches!(
            lifecycle.accept(conn, RoomId::new("r1")).await,
            Err(LifecycleError::ShuttingDown)
        ));
        assert_eq!(lifecycle.registry().subscriber_count("r1"), 0);
    }

    #[tokio::test]
    async fn test_write_failure_terminates() {
        let lifecycle = lifecycle();
        let (conn, mut peer) = mock_connection("c1");
        peer.frames.close();

        let task = tokio::spawn({
            let lifecycle = lifecycle.clone();
            async move { lifecycle.accept(conn, RoomId::new("r1")).await }
        });
        wait_for_subscribers(lifecycle.registry(), "r1", 1).await;

        let dispatcher = Dispatcher::new(lifecycle.registry().clone());
        dispatcher
            .deliver(&Event::new("r1", EventPayload::message_answered("m1")))
            .await;

        assert_eq!(task.await.unwrap().unwrap(), CloseReason::TransportError);
        assert_eq!(lifecycle.registry().subscriber_count("r1"), 0);
        drop(peer);
    }

    #[tokio::test]
    async fn test_only_room_subscribers_receive() {
        let lifecycle = lifecycle();
        let dispatcher = Arc::new(Dispatcher::new(lifecycle.registry().clone()));
        let (events, receiver) = dispatch_queue(16);
        let worker = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.run(receiver).await }
        });

        let (conn_a, mut peer_a) = mock_connection("a");
        let (conn_b, mut peer_b) = mock_connection("b");
        for (conn, room) in [(conn_a, "r1"), (conn_b, "r2")] {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.accept(conn, RoomId::new(room)).await });
        }
        wait_for_subscribers(lifecycle.registry(), "r1", 1).await;
        wait_for_subscribers(lifecycle.registry(), "r2", 1).await;

        events
            .dispatch(Event::new("r1", EventPayload::message_created("m1", "hi")))
            .unwrap();

        let frame = peer_a.next_frame().await.expect("A receives the event");
        assert_eq!(
            &*frame,
            r#"{"kind":"message_created","value":{"id":"m1","message":"hi"}}"#
        );
        assert!(peer_b.frames.try_recv().is_err());

        drop(events);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_departed_subscriber_gets_no_sends() {
        let lifecycle = lifecycle();
        let dispatcher = Dispatcher::new(lifecycle.registry().clone());

        let (conn_a, mut peer_a) = mock_connection("a");
        let (conn_b, mut peer_b) = mock_connection("b");
        let task_a = tokio::spawn({
            let lifecycle = lifecycle.clone();
            async move { lifecycle.accept(conn_a, RoomId::new("r1")).await }
        });
        tokio::spawn({
            let lifecycle = lifecycle.clone();
            async move { lifecycle.accept(conn_b, RoomId::new("r1")).await }
        });
        wait_for_subscribers(lifecycle.registry(), "r1", 2).await;

        peer_a.disconnect();
        assert_eq!(task_a.await.unwrap().unwrap(), CloseReason::ClientClosed);
        wait_for_subscribers(lifecycle.registry(), "r1", 1).await;

        let outcome = dispatcher
            .deliver(&Event::new("r1", EventPayload::reaction_increased("m1", 1)))
            .await;
        assert_eq!(outcome.attempted, 1);
        assert_eq!(outcome.delivered, 1);

        assert!(peer_b.next_frame().await.is_some());
        assert!(peer_a.frames.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_stalled_write() {
        let lifecycle = lifecycle();
        let (conn, peer) = mock_connection("c1");
        peer.stall();

        let task = tokio::spawn({
            let lifecycle = lifecycle.clone();
            async move { lifecycle.accept(conn, RoomId::new("r1")).await }
        });
        wait_for_subscribers(lifecycle.registry(), "r1", 1).await;

        let handle = lifecycle.registry().snapshot("r1").remove(0);
        handle.send(Arc::from("frame")).await.unwrap();
        wait_for_write(&peer).await;
        assert!(handle.cancel());

        let reason = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("lifecycle stuck in a stalled write")
            .unwrap()
            .unwrap();
        assert_eq!(reason, CloseReason::Cancelled);
        assert_eq!(lifecycle.registry().stats().subscriber_count, 0);
        // The close frame could not be written either
        assert!(!peer.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_timeout_terminates_stalled_peer() {
        let lifecycle = Arc::new(Lifecycle::new(
            Arc::new(Registry::new()),
            LifecycleConfig { outbound_buffer: 1 },
        ));
        let dispatcher = Dispatcher::with_config(
            lifecycle.registry().clone(),
            DispatcherConfig {
                send_timeout: Duration::from_millis(100),
            },
        );
        let (conn, peer) = mock_connection("c1");
        peer.stall();

        let task = tokio::spawn({
            let lifecycle = lifecycle.clone();
            async move { lifecycle.accept(conn, RoomId::new("r1")).await }
        });
        wait_for_subscribers(lifecycle.registry(), "r1", 1).await;

        let event = Event::new("r1", EventPayload::message_answered("m1"));
        // First frame is taken by the stalled write, second fills the buffer
        assert_eq!(dispatcher.deliver(&event).await.delivered, 1);
        wait_for_write(&peer).await;
        assert_eq!(dispatcher.deliver(&event).await.delivered, 1);

        let outcome = dispatcher.deliver(&event).await;
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.cancelled, 1);

        let reason = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("lifecycle stuck in a stalled write")
            .unwrap()
            .unwrap();
        assert_eq!(reason, CloseReason::Cancelled);
        assert_eq!(lifecycle.registry().subscriber_count("r1"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_stalled_writes() {
        let lifecycle = lifecycle();
        let mut tasks = Vec::new();
        let mut peers = Vec::new();
        for i in 0..2 {
            let (conn, peer) = mock_connection(&format!("c{i}"));
            peer.stall();
            peers.push(peer);
            let lifecycle = lifecycle.clone();
            tasks.push(tokio::spawn(async move {
                lifecycle.accept(conn, RoomId::new("r1")).await
            }));
        }
        wait_for_subscribers(lifecycle.registry(), "r1", 2).await;

        for handle in lifecycle.registry().snapshot("r1") {
            handle.send(Arc::from("frame")).await.unwrap();
        }
        for peer in &peers {
            wait_for_write(peer).await;
        }

        lifecycle.shutdown();

        for task in tasks {
            let reason = tokio::time::timeout(Duration::from_secs(5), task)
                .await
                .expect("lifecycle stuck in a stalled write")
                .unwrap()
                .unwrap();
            assert_eq!(reason, CloseReason::Shutdown);
        }
        assert_eq!(lifecycle.registry().stats().room_count, 0);
    }
}
