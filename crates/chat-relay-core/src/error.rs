//! Relay error taxonomy.

use thiserror::Error;

use crate::traits::BackendError;

/// Error returned by relay operations.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Required configuration is missing or invalid.
    #[error("{0}")]
    Config(String),
    /// The inbound request is missing a field or carries a bad value.
    #[error("{0}")]
    Validation(String),
    /// A session id is required but was not supplied.
    #[error("sessionId is required")]
    InvalidSession,
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// At least one agent failed under the all-or-nothing policy.
    #[error("Agent {agent} failed: {source}")]
    MultiAgent {
        agent: String,
        #[source]
        source: BackendError,
    },
}

impl RelayError {
    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
