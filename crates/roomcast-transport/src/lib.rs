//! # roomcast-transport
//!
//! Connection abstraction for roomcast live subscribers.
//!
//! The lifecycle manager in `roomcast-core` only needs to push text frames
//! to a peer and notice when it goes away. Every transport exposes that
//! through the [`Connection`] trait:
//!
//! - **WebSocket** - axum upgrade adapter (feature `websocket`, on by default)
//!
//! ```rust,ignore
//! use roomcast_transport::Connection;
//!
//! async fn drain(mut conn: impl Connection) {
//!     while let Ok(Some(text)) = conn.recv().await {
//!         // Inbound text is not part of the subscribe protocol
//!     }
//! }
//! ```

pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{Connection, ConnectionId, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnection;
