//! In-memory message storage.

use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;
use chat_relay_core::{Message, MessageStore, Role, SessionId, StorageError};

/// In-memory storage implementation.
///
/// Useful for development and single-process deployments.
/// Data is lost on restart.
pub struct MemoryStore {
    sessions: RwLock<HashMap<SessionId, Vec<Message>>>,
}

impl MemoryStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Number of sessions with at least one message.
    ///
    /// # Errors
    /// Returns error if the lock is poisoned.
    pub fn session_count(&self) -> Result<usize, StorageError> {
        Ok(self
            .sessions
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .len())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert(
        &self,
        session: &str,
        role: Role,
        content: &str,
    ) -> Result<Message, StorageError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;

        let history = sessions.entry(session.to_string()).or_default();

        // Keep timestamps monotonic so time order equals insertion order.
        let mut msg = Message::now(role, content);
        if let Some(last) = history.last() {
            if msg.timestamp < last.timestamp {
                msg.timestamp = last.timestamp;
            }
        }
        history.push(msg.clone());

        Ok(msg)
    }

    async fn select_ordered_by_time(&self, session: &str) -> Result<Vec<Message>, StorageError> {
        Ok(self
            .sessions
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .get(session)
            .cloned()
            .unwrap_or_default())
    }
}
