//! Core abstractions for the chat relay.
//!
//! This crate provides the fundamental building blocks:
//! - `Message` / `ChatMessage` / `AgentSpec` - The conversation data model
//! - `BackendRequest` - A request whose message list always starts with one system message
//! - `ContextBuilder` - Bounded context window assembly per session
//! - `RelayConfig` - Per-call validated configuration
//! - Storage and Backend traits

pub mod config;
pub mod context;
pub mod error;
pub mod message;
pub mod traits;

pub use config::{BackendKind, FailurePolicy, RelayConfig, ResolvedConfig};
pub use context::ContextBuilder;
pub use error::RelayError;
pub use message::{AgentSpec, BackendRequest, ChatMessage, Message, Role, Session, SessionId};
pub use traits::{Backend, BackendError, ByteStream, MessageStore, StorageError};
