//! Fixtures shared by the roomcast benchmarks.

use async_trait::async_trait;
use roomcast_core::{DeliveryError, EventSink, Registry, RoomId, SubscriberHandle};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Sink that accepts every frame and discards it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn send(&self, _frame: Arc<str>) -> Result<(), DeliveryError> {
        Ok(())
    }
}

/// Room name used for the `index`th benchmark room.
#[must_use]
pub fn room_name(index: usize) -> RoomId {
    RoomId::new(format!("room:{index}"))
}

/// Build a registry with `rooms` rooms of `per_room` discarding subscribers.
#[must_use]
pub fn populated_registry(rooms: usize, per_room: usize) -> Arc<Registry> {
    let registry = Arc::new(Registry::new());
    for i in 0..rooms {
        let room = room_name(i);
        for _ in 0..per_room {
            let handle = SubscriberHandle::new(NullSink, CancellationToken::new());
            // Fresh handles are never already registered
            let _ = registry.register(&room, Arc::new(handle));
        }
    }
    registry
}
