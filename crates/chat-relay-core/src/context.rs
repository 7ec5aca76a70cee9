//! Context window assembly for a session.

use std::sync::Arc;

use crate::{
    config::ResolvedConfig,
    error::RelayError,
    message::{BackendRequest, ChatMessage, Role},
    traits::MessageStore,
};

/// Builds the bounded message list sent downstream for one user turn.
///
/// With a store the session's persisted history is the source of truth and a
/// session id is mandatory. Without one the builder is memoryless and only
/// uses the history the client sent along, if any.
#[derive(Clone, Default)]
pub struct ContextBuilder {
    store: Option<Arc<dyn MessageStore>>,
}

impl ContextBuilder {
    /// Create a builder backed by a message store.
    #[must_use]
    pub fn new(store: Option<Arc<dyn MessageStore>>) -> Self {
        Self { store }
    }

    /// Create a builder without persistence.
    #[must_use]
    pub fn memoryless() -> Self {
        Self { store: None }
    }

    /// Whether a store backs this builder.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.store.is_some()
    }

    /// Produce `[system] + last min(max_history, |history|) + [user]`.
    ///
    /// # Errors
    /// Returns [`RelayError::InvalidSession`] when a store is configured and
    /// `session_id` is absent.
    pub async fn build(
        &self,
        config: &ResolvedConfig,
        session_id: Option<&str>,
        client_history: Option<&[ChatMessage]>,
        user_text: &str,
    ) -> Result<BackendRequest, RelayError> {
        let history: Vec<ChatMessage> = match &self.store {
            Some(store) => {
                let session = session_id
                    .filter(|s| !s.trim().is_empty())
                    .ok_or(RelayError::InvalidSession)?;
                match store.select_ordered_by_time(session).await {
                    Ok(messages) => messages.iter().map(ChatMessage::from).collect(),
                    Err(e) => {
                        tracing::error!(session, "Failed to load history, continuing without: {e}");
                        Vec::new()
                    }
                }
            }
            None => client_history.map(<[ChatMessage]>::to_vec).unwrap_or_default(),
        };

        let window = bounded_window(history, config.max_history);
        tracing::debug!(
            session = session_id.unwrap_or("-"),
            history = window.len(),
            "Built context"
        );

        Ok(BackendRequest::new(
            config.base_url.clone(),
            config.model.clone(),
            config.system_prompt.clone(),
            window.into_iter().chain(std::iter::once(ChatMessage::user(user_text))),
        ))
    }
}

/// Keep the last `max` non-system messages, in order.
fn bounded_window(history: Vec<ChatMessage>, max: usize) -> Vec<ChatMessage> {
    let mut history: Vec<ChatMessage> = history
        .into_iter()
        .filter(|m| m.role != Role::System)
        .collect();
    let skip = history.len().saturating_sub(max);
    history.drain(..skip);
    history
}
