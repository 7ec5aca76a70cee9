//! Core traits for storage and backend dispatch.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::message::{BackendRequest, Message, Role, Session};

/// Storage error.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Session not found: {0}")]
    NotFound(String),
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Durable, append-only message history.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append one message to a session, creating the session on first use.
    async fn insert(&self, session: &str, role: Role, content: &str)
    -> Result<Message, StorageError>;

    /// All messages of a session, oldest first.
    async fn select_ordered_by_time(&self, session: &str) -> Result<Vec<Message>, StorageError>;

    /// Load a session with its full history.
    async fn load_session(&self, session: &str) -> Result<Session, StorageError> {
        let messages = self.select_ordered_by_time(session).await?;
        Ok(Session::from_messages(session, messages))
    }
}

/// Backend error.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The backend answered with a non-2xx status.
    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },
    /// The backend could not be reached.
    #[error("Backend unreachable: {0}")]
    Unreachable(String),
    /// The upstream stream failed after headers were received.
    #[error("Backend stream error: {0}")]
    Stream(String),
}

/// Raw upstream bytes of a streaming reply.
///
/// Lazy, finite and not restartable: it ends when the upstream connection
/// closes, and dropping it closes the connection.
pub type ByteStream = BoxStream<'static, Result<Bytes, BackendError>>;

/// An inference backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Dispatch a request and wait for the whole reply.
    ///
    /// A reply body that lacks the expected field yields an empty string.
    async fn complete(&self, request: &BackendRequest) -> Result<String, BackendError>;

    /// Dispatch a request and return the upstream event stream.
    async fn stream(&self, request: &BackendRequest) -> Result<ByteStream, BackendError>;
}
