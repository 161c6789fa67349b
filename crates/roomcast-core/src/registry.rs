//! Subscription registry.
//!
//! Maps each room to the subscribers currently watching it. The registry
//! never owns connections; it holds shared handles purely for routing.

use crate::event::RoomId;
use crate::subscriber::{SubscriberHandle, SubscriberId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The handle is already a member of a room.
    #[error("Subscriber {subscriber} is already registered in room {room}")]
    AlreadyRegistered {
        /// The offending subscriber.
        subscriber: SubscriberId,
        /// The room it already belongs to.
        room: RoomId,
    },
}

/// Room membership bookkeeping.
///
/// Lock order is always `memberships` before `rooms`.
#[derive(Debug, Default)]
pub struct Registry {
    /// Subscribers indexed by room.
    rooms: DashMap<RoomId, HashMap<SubscriberId, Arc<SubscriberHandle>>>,
    /// Reverse index (subscriber -> room), enforcing single membership.
    memberships: DashMap<SubscriberId, RoomId>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber to a room.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is already registered in any room.
    pub fn register(
        &self,
        room: &RoomId,
        handle: Arc<SubscriberHandle>,
    ) -> Result<(), RegistryError> {
        let id = handle.id();

        match self.memberships.entry(id) {
            Entry::Occupied(existing) => Err(RegistryError::AlreadyRegistered {
                subscriber: id,
                room: existing.get().clone(),
            }),
            Entry::Vacant(slot) => {
                let subscribers = {
                    let mut members = self.rooms.entry(room.clone()).or_default();
                    members.insert(id, handle);
                    members.len()
                };
                slot.insert(room.clone());

                debug!(room = %room, subscriber = %id, subscribers, "Registered");
                Ok(())
            }
        }
    }

    /// Remove a subscriber from a room.
    ///
    /// Idempotent: returns `false` if the subscriber was not in the room.
    pub fn unregister(&self, room: &RoomId, id: SubscriberId) -> bool {
        let membership = self.memberships.entry(id);

        let removed = match self.rooms.get_mut(room) {
            Some(mut members) => {
                let removed = members.remove(&id).is_some();
                let now_empty = members.is_empty();
                drop(members);

                if now_empty
                    && self
                        .rooms
                        .remove_if(room, |_, members| members.is_empty())
                        .is_some()
                {
                    debug!(room = %room, "Removed empty room");
                }
                removed
            }
            None => false,
        };

        if let Entry::Occupied(membership) = membership {
            if membership.get() == room {
                membership.remove();
            }
        }

        if removed {
            debug!(room = %room, subscriber = %id, "Unregistered");
        }
        removed
    }

    /// Point-in-time copy of a room's subscribers.
    ///
    /// Absent and empty rooms both yield an empty list.
    #[must_use]
    pub fn snapshot(&self, room: &str) -> Vec<Arc<SubscriberHandle>> {
        self.rooms
            .get(room)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of subscribers currently in a room.
    #[must_use]
    pub fn subscriber_count(&self, room: &str) -> usize {
        self.rooms.get(room).map(|m| m.len()).unwrap_or(0)
    }

    /// The room a subscriber is registered in, if any.
    #[cfg(test)]
    pub(crate) fn room_of(&self, id: SubscriberId) -> Option<RoomId> {
        self.memberships.get(&id).map(|r| r.value().clone())
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            room_count: self.rooms.len(),
            subscriber_count: self.memberships.len(),
        }
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Rooms with at least one subscriber.
    pub room_count: usize,
    /// Live subscribers across all rooms.
    pub subscriber_count: usize,
}
