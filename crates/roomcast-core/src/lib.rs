//! # roomcast-core
//!
//! Real-time fan-out for roomcast rooms.
//!
//! This crate provides the pieces that push freshly written room events to
//! the connections watching that room:
//!
//! - **Registry** - which live subscribers are interested in which room
//! - **Dispatcher** - best-effort, per-subscriber delivery of one event
//! - **Lifecycle** - the per-connection loop that registers on start and
//!   deregisters on end
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  dispatch  ┌─────────────┐  snapshot  ┌─────────────┐
//! │   Producer   │───────────▶│ Dispatcher  │───────────▶│  Registry   │
//! └──────────────┘  (queue)   └─────────────┘            └─────────────┘
//!                                    │ send / cancel            ▲
//!                                    ▼                          │ register
//!                             ┌─────────────┐                   │ unregister
//!                             │  Lifecycle  │───────────────────┘
//!                             └─────────────┘
//! ```

pub mod dispatcher;
pub mod event;
pub mod lifecycle;
pub mod registry;
pub mod subscriber;

#[cfg(test)]
mod testing;

pub use dispatcher::{
    dispatch_queue, DispatchError, DispatchHandle, DispatchOutcome, DispatchReceiver,
    Dispatcher, DispatcherConfig,
};
pub use event::{Event, EventId, RoomId};
pub use lifecycle::{CloseReason, Lifecycle, LifecycleConfig, LifecycleError, LifecycleState};
pub use registry::{Registry, RegistryError, RegistryStats};
pub use subscriber::{ChannelSink, DeliveryError, EventSink, SubscriberHandle, SubscriberId};
