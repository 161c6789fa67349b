//! Text codec for event frames.
//!
//! Events are encoded once per dispatch and the same text is shared by
//! every subscriber of the room.

use thiserror::Error;

use crate::frames::EventPayload;

/// Maximum encoded frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode an event payload to its JSON text frame.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(payload: &EventPayload) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(payload)?;

    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    Ok(text)
}

/// Decode a JSON text frame into an event payload.
///
/// # Errors
///
/// Returns an error if the frame is too large or is not a known event.
pub fn decode(text: &str) -> Result<EventPayload, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    Ok(serde_json::from_str(text)?)
}
