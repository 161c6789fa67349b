//! HTTP error responses.
//!
//! Client errors carry a short plain-text reason. Upstream failures are
//! logged with their detail and answered with a generic message.

use crate::metrics;
use crate::store::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

pub const MSG_INVALID_JSON: &str = "invalid json";
pub const MSG_INVALID_MESSAGE_ID: &str = "invalid message id";
pub const MSG_INVALID_ROOM_ID: &str = "invalid room id";
pub const MSG_MESSAGE_NOT_FOUND: &str = "message not found";
pub const MSG_ROOM_NOT_FOUND: &str = "room not found";
pub const MSG_SOMETHING_WENT_WRONG: &str = "something went wrong";
pub const MSG_FAILED_TO_UPGRADE: &str = "failed to upgrade to websocket connection";

/// Errors surfaced by request handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed identifier or body.
    #[error("{0}")]
    Validation(&'static str),

    /// The addressed room or message does not exist.
    #[error("{0}")]
    NotFound(&'static str),

    /// The store failed.
    #[error("{context}: {source}")]
    Upstream {
        context: &'static str,
        #[source]
        source: StoreError,
    },
}

impl ApiError {
    /// Map a store error, treating `NotFound` as a missing `what`.
    pub fn from_store(source: StoreError, not_found: &'static str, context: &'static str) -> Self {
        match source {
            StoreError::NotFound => Self::NotFound(not_found),
            source => Self::Upstream { context, source },
        }
    }

    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Upstream { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Self::Validation(reason) | Self::NotFound(reason) => (status, reason).into_response(),
            Self::Upstream { context, source } => {
                error!(error = %source, "{}", context);
                metrics::record_error("store");
                (status, MSG_SOMETHING_WENT_WRONG).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_not_found_maps_to_404() {
        let err = ApiError::from_store(StoreError::NotFound, MSG_ROOM_NOT_FOUND, "failed to get room");
        assert!(matches!(err, ApiError::NotFound(MSG_ROOM_NOT_FOUND)));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_upstream_hides_detail() {
        let err = ApiError::from_store(
            StoreError::Unavailable("connection refused".into()),
            MSG_ROOM_NOT_FOUND,
            "failed to get room",
        );
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_validation_is_client_error() {
        let response = ApiError::Validation(MSG_INVALID_JSON).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
