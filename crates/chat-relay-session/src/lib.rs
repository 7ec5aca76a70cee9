//! Conversation orchestration and storage for the chat relay.
//!
//! Provides:
//! - `ChatPipeline` - context builder → backend → optional persistence sink
//! - `MultiAgentOrchestrator` - concurrent fan-out to named agent personas
//! - `PersistenceSink` - fire-and-forget background writer
//! - Storage implementations (memory, SQLite)

pub mod orchestrator;
pub mod pipeline;
pub mod sink;
pub mod storage;

pub use orchestrator::{AgentOutcome, AgentReplies, MultiAgentOrchestrator};
pub use pipeline::{ChatPipeline, ChatTurn, TurnCompletion};
pub use sink::{PersistReport, PersistenceSink};
