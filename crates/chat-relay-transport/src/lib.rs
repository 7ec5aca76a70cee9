//! Transport layer for the chat relay.
//!
//! Provides:
//! - JSON request/response bodies
//! - Streaming relay (pass-through or cumulative snapshots)
//! - Axum router and error mapping (feature: http)

pub mod protocol;
pub mod relay;

#[cfg(feature = "http")]
pub mod error;
#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use error::ApiError;
#[cfg(feature = "http")]
pub use http::{AppState, router};
pub use protocol::{ChatRequest, ErrorBody, HistoryQuery, MultiChatRequest, ReplyBody};
pub use relay::{RelayPolicy, relay};
