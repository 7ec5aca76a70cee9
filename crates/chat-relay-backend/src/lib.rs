//! HTTP inference backends for the chat relay.
//!
//! Provides:
//! - Chat-completions backend (sync JSON + SSE streaming)
//! - Single-model inference backend (`{inputs}` → `[{generated_text}]`)
//! - Stateful SSE parser, independent of transport plumbing

pub mod chat;
pub mod inference;
pub mod protocol;
pub mod sse;

pub use chat::ChatCompletionsBackend;
pub use inference::InferenceBackend;
pub use sse::{SseEvent, SseParser, fragment_text};

use chat_relay_core::BackendError;

/// Map a transport failure from `reqwest` into a backend error.
pub(crate) fn unreachable(err: &reqwest::Error) -> BackendError {
    BackendError::Unreachable(err.to_string())
}

/// Read the body of a non-2xx response and turn it into a backend error.
pub(crate) async fn status_error(backend: &str, response: reqwest::Response) -> BackendError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    tracing::error!(backend, status, body = %body, "Backend API error");
    BackendError::Status { status, body }
}
