//! Events routed to room subscribers.

use roomcast_protocol::EventPayload;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A unique event identifier, used for tracing only.
pub type EventId = u64;

static EVENT_COUNTER: AtomicU64 = AtomicU64::new(1);

fn generate_event_id() -> EventId {
    EVENT_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Opaque room key.
///
/// Whoever builds a `RoomId` is responsible for having validated it; the
/// fan-out layer only compares and hashes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Create a room ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for RoomId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for RoomId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An event waiting to be fanned out.
#[derive(Debug, Clone)]
pub struct Event {
    /// Unique event identifier.
    pub id: EventId,
    /// Room whose subscribers receive the event. Not part of the wire frame.
    pub room: RoomId,
    /// What subscribers see.
    pub payload: EventPayload,
    /// When the producer created the event.
    pub created_at: Instant,
}

impl Event {
    /// Create a new event for a room.
    #[must_use]
    pub fn new(room: impl Into<RoomId>, payload: EventPayload) -> Self {
        Self {
            id: generate_event_id(),
            room: room.into(),
            payload,
            created_at: Instant::now(),
        }
    }

    /// The wire tag of the payload.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }
}
