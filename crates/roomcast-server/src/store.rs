//! Persistence for rooms, messages and reaction counts.
//!
//! Handlers talk to a [`Store`]; the binary ships the in-memory
//! [`MemoryStore`].

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use uuid::Uuid;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record does not exist.
    #[error("Record not found")]
    NotFound,

    /// The backend could not serve the request.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// A room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Room {
    pub id: Uuid,
    pub theme: String,
}

/// A message posted to a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredMessage {
    pub id: Uuid,
    pub room_id: Uuid,
    pub message: String,
    pub reaction_count: i64,
    pub answered: bool,
}

/// Durable storage used by the HTTP handlers.
#[async_trait]
pub trait Store: Send + Sync {
    /// Create a room and return its ID.
    async fn create_room(&self, theme: &str) -> Result<Uuid, StoreError>;

    /// Fetch a room.
    async fn get_room(&self, id: Uuid) -> Result<Room, StoreError>;

    /// All rooms in creation order.
    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError>;

    /// Post a message to a room and return its ID.
    async fn create_message(&self, room_id: Uuid, message: &str) -> Result<Uuid, StoreError>;

    /// Messages of a room in creation order.
    async fn list_messages(&self, room_id: Uuid) -> Result<Vec<StoredMessage>, StoreError>;

    /// Fetch a message.
    async fn get_message(&self, id: Uuid) -> Result<StoredMessage, StoreError>;

    /// Add a reaction and return the new count.
    async fn increment_reaction(&self, id: Uuid) -> Result<i64, StoreError>;

    /// Remove a reaction and return the new count, never below zero.
    async fn decrement_reaction(&self, id: Uuid) -> Result<i64, StoreError>;

    /// Mark a message as answered.
    async fn mark_answered(&self, id: Uuid) -> Result<(), StoreError>;
}

struct Sequenced<T> {
    seq: u64,
    record: T,
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    rooms: DashMap<Uuid, Sequenced<Room>>,
    messages: DashMap<Uuid, Sequenced<StoredMessage>>,
    sequence: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn update_message<R>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut StoredMessage) -> R,
    ) -> Result<R, StoreError> {
        self.messages
            .get_mut(&id)
            .map(|mut entry| f(&mut entry.record))
            .ok_or(StoreError::NotFound)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_room(&self, theme: &str) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let record = Room {
            id,
            theme: theme.to_string(),
        };
        self.rooms.insert(
            id,
            Sequenced {
                seq: self.next_seq(),
                record,
            },
        );
        Ok(id)
    }

    async fn get_room(&self, id: Uuid) -> Result<Room, StoreError> {
        self.rooms
            .get(&id)
            .map(|entry| entry.record.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError> {
        let mut rooms: Vec<_> = self
            .rooms
            .iter()
            .map(|entry| (entry.seq, entry.record.clone()))
            .collect();
        rooms.sort_by_key(|(seq, _)| *seq);
        Ok(rooms.into_iter().map(|(_, room)| room).collect())
    }

    async fn create_message(&self, room_id: Uuid, message: &str) -> Result<Uuid, StoreError> {
        if !self.rooms.contains_key(&room_id) {
            return Err(StoreError::NotFound);
        }

        let id = Uuid::new_v4();
        let record = StoredMessage {
            id,
            room_id,
            message: message.to_string(),
            reaction_count: 0,
            answered: false,
        };
        self.messages.insert(
            id,
            Sequenced {
                seq: self.next_seq(),
                record,
            },
        );
        Ok(id)
    }

    async fn list_messages(&self, room_id: Uuid) -> Result<Vec<StoredMessage>, StoreError> {
        let mut messages: Vec<_> = self
            .messages
            .iter()
            .filter(|entry| entry.record.room_id == room_id)
            .map(|entry| (entry.seq, entry.record.clone()))
            .collect();
        messages.sort_by_key(|(seq, _)| *seq);
        Ok(messages.into_iter().map(|(_, message)| message).collect())
    }

    async fn get_message(&self, id: Uuid) -> Result<StoredMessage, StoreError> {
        self.messages
            .get(&id)
            .map(|entry| entry.record.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn increment_reaction(&self, id: Uuid) -> Result<i64, StoreError> {
        self.update_message(id, |message| {
            message.reaction_count += 1;
            message.reaction_count
        })
    }

    async fn decrement_reaction(&self, id: Uuid) -> Result<i64, StoreError> {
        self.update_message(id, |message| {
            message.reaction_count = (message.reaction_count - 1).max(0);
            message.reaction_count
        })
    }

    async fn mark_answered(&self, id: Uuid) -> Result<(), StoreError> {
        self.update_message(id, |message| message.answered = true)
    }
}
