//! Event payloads delivered to room subscribers.

use serde::{Deserialize, Serialize};

/// A live event as seen by a subscriber.
///
/// Serialized adjacently tagged: the variant name lands in `kind` and the
/// fields in `value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EventPayload {
    /// A message was posted to the room.
    MessageCreated {
        /// Message identifier.
        id: String,
        /// Message text.
        message: String,
    },

    /// A message received a reaction.
    #[serde(rename = "message_reaction_increased")]
    ReactionIncreased {
        /// Message identifier.
        id: String,
        /// Reaction count after the increment.
        count: i64,
    },

    /// A reaction was removed from a message.
    #[serde(rename = "message_reaction_decreased")]
    ReactionDecreased {
        /// Message identifier.
        id: String,
        /// Reaction count after the decrement.
        count: i64,
    },

    /// A message was marked as answered.
    MessageAnswered {
        /// Message identifier.
        id: String,
    },
}

impl EventPayload {
    /// Create a `message_created` payload.
    #[must_use]
    pub fn message_created(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MessageCreated {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Create a `message_reaction_increased` payload.
    #[must_use]
    pub fn reaction_increased(id: impl Into<String>, count: i64) -> Self {
        Self::ReactionIncreased {
            id: id.into(),
            count,
        }
    }

    /// Create a `message_reaction_decreased` payload.
    #[must_use]
    pub fn reaction_decreased(id: impl Into<String>, count: i64) -> Self {
        Self::ReactionDecreased {
            id: id.into(),
            count,
        }
    }

    /// Create a `message_answered` payload.
    #[must_use]
    pub fn message_answered(id: impl Into<String>) -> Self {
        Self::MessageAnswered { id: id.into() }
    }

    /// The wire tag of this payload.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageCreated { .. } => "message_created",
            Self::ReactionIncreased { .. } => "message_reaction_increased",
            Self::ReactionDecreased { .. } => "message_reaction_decreased",
            Self::MessageAnswered { .. } => "message_answered",
        }
    }

    /// The message this payload refers to.
    #[must_use]
    pub fn message_id(&self) -> &str {
        match self {
            Self::MessageCreated { id, .. }
            | Self::ReactionIncreased { id, .. }
            | Self::ReactionDecreased { id, .. }
            | Self::MessageAnswered { id } => id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_created_shape() {
        let value = serde_json::to_value(EventPayload::message_created("m1", "hi")).unwrap();
        assert_eq!(
            value,
            json!({ "kind": "message_created", "value": { "id": "m1", "message": "hi" } })
        );
    }

    #[test]
    fn test_reaction_shapes() {
        let up = serde_json::to_value(EventPayload::reaction_increased("m1", 3)).unwrap();
        assert_eq!(
            up,
            json!({ "kind": "message_reaction_increased", "value": { "id": "m1", "count": 3 } })
        );

        let down = serde_json::to_value(EventPayload::reaction_decreased("m1", 2)).unwrap();
        assert_eq!(down["kind"], "message_reaction_decreased");
        assert_eq!(down["value"]["count"], 2);
    }

    #[test]
    fn test_answered_shape() {
        let value = serde_json::to_value(EventPayload::message_answered("m9")).unwrap();
        assert_eq!(
            value,
            json!({ "kind": "message_answered", "value": { "id": "m9" } })
        );
    }

    #[test]
    fn test_kind_matches_wire_tag() {
        let payloads = [
            EventPayload::message_created("a", "b"),
            EventPayload::reaction_increased("a", 1),
            EventPayload::reaction_decreased("a", 0),
            EventPayload::message_answered("a"),
        ];
        for payload in payloads {
            let value = serde_json::to_value(&payload).unwrap();
            assert_eq!(value["kind"], payload.kind());
            assert_eq!(payload.message_id(), "a");
        }
    }
}
