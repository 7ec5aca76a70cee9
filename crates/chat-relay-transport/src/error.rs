//! Mapping of relay errors onto HTTP responses.

use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chat_relay_core::{BackendError, RelayError};

use crate::protocol::ErrorBody;

/// Message returned when a multi-agent call fails as a whole.
pub const MULTI_AGENT_FAILED: &str = "Multi-agent orchestration failed";

/// A [`RelayError`] rendered as `{"error": "..."}` with a matching status.
#[derive(Debug)]
pub struct ApiError(pub RelayError);

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            RelayError::Config(_) | RelayError::MultiAgent { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            RelayError::Validation(_) | RelayError::InvalidSession => StatusCode::BAD_REQUEST,
            RelayError::Backend(BackendError::Status { status, .. }) => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            RelayError::Backend(BackendError::Unreachable(_) | BackendError::Stream(_)) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }

    /// Text placed in the `error` field.
    #[must_use]
    pub fn message(&self) -> String {
        match &self.0 {
            RelayError::Backend(BackendError::Status { body, .. }) => body.clone(),
            RelayError::MultiAgent { .. } => MULTI_AGENT_FAILED.to_string(),
            other => other.to_string(),
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(RelayError::validation(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(RelayError::validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "Request failed: {}", self.0);
        } else {
            tracing::debug!(status = status.as_u16(), "Request rejected: {}", self.0);
        }
        (status, Json(ErrorBody { error: self.message() })).into_response()
    }
}
