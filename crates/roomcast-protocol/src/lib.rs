//! # roomcast-protocol
//!
//! Wire shape of the events pushed to live room subscribers.
//!
//! Every event travels as a JSON text frame with two fields:
//!
//! ```text
//! { "kind": "message_created", "value": { "id": "...", "message": "..." } }
//! ```
//!
//! The room an event belongs to is used for routing only and never
//! appears on the wire.
//!
//! ## Example
//!
//! ```rust
//! use roomcast_protocol::{codec, EventPayload};
//!
//! let payload = EventPayload::message_created("m1", "hi");
//! let text = codec::encode(&payload).unwrap();
//! assert_eq!(text, r#"{"kind":"message_created","value":{"id":"m1","message":"hi"}}"#);
//! assert_eq!(codec::decode(&text).unwrap(), payload);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, ProtocolError};
pub use frames::EventPayload;
