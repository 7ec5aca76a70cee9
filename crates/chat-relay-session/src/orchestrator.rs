//! Multi-agent fan-out.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use chat_relay_core::{
    AgentSpec, Backend, BackendError, BackendRequest, ChatMessage, FailurePolicy, RelayConfig,
    RelayError,
};
use futures::future::join_all;
use serde::Serialize;

/// Result of one agent call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AgentOutcome {
    /// The agent's reply text.
    Reply(String),
    /// The agent's call failed; serialized as `{"error": "..."}`.
    Failed { error: String },
}

impl AgentOutcome {
    #[must_use]
    pub fn reply(&self) -> Option<&str> {
        match self {
            Self::Reply(text) => Some(text),
            Self::Failed { .. } => None,
        }
    }
}

/// Replies keyed by agent name.
pub type AgentReplies = BTreeMap<String, AgentOutcome>;

/// Sends one question to several agent personas at once.
pub struct MultiAgentOrchestrator {
    config: Arc<RelayConfig>,
    backend: Arc<dyn Backend>,
}

impl MultiAgentOrchestrator {
    #[must_use]
    pub fn new(config: Arc<RelayConfig>, backend: Arc<dyn Backend>) -> Self {
        Self { config, backend }
    }

    /// Agents used when the caller does not supply any.
    #[must_use]
    pub fn default_agents(&self) -> &[AgentSpec] {
        &self.config.agents
    }

    /// Ask every agent under the configured failure policy.
    ///
    /// # Errors
    /// See [`Self::ask_with_policy`].
    pub async fn ask(
        &self,
        question: &str,
        agents: &[AgentSpec],
    ) -> Result<AgentReplies, RelayError> {
        self.ask_with_policy(question, agents, self.config.agent_policy)
            .await
    }

    /// Ask every agent concurrently and wait until all calls have settled.
    ///
    /// # Errors
    /// Returns a config or validation error before dispatching anything, and
    /// [`RelayError::MultiAgent`] for the first failed agent (in roster order)
    /// under [`FailurePolicy::AllOrNothing`].
    pub async fn ask_with_policy(
        &self,
        question: &str,
        agents: &[AgentSpec],
        policy: FailurePolicy,
    ) -> Result<AgentReplies, RelayError> {
        let config = self.config.validate()?;
        if question.trim().is_empty() {
            return Err(RelayError::validation("question is required"));
        }
        check_roster(agents)?;

        let calls = agents.iter().map(|agent| {
            let request = BackendRequest::new(
                config.base_url.clone(),
                config.model.clone(),
                agent.system_prompt.clone(),
                [ChatMessage::user(question)],
            );
            let backend = Arc::clone(&self.backend);
            async move {
                let result = backend.complete(&request).await;
                (agent.name.clone(), result)
            }
        });

        let settled: Vec<(String, Result<String, BackendError>)> = join_all(calls).await;
        tracing::debug!(
            agents = settled.len(),
            failed = settled.iter().filter(|(_, r)| r.is_err()).count(),
            "Fan-out settled"
        );

        let mut replies = AgentReplies::new();
        for (agent, result) in settled {
            let outcome = match result {
                Ok(text) => AgentOutcome::Reply(text),
                Err(source) => {
                    tracing::warn!(%agent, "Agent call failed: {source}");
                    if policy == FailurePolicy::AllOrNothing {
                        return Err(RelayError::MultiAgent { agent, source });
                    }
                    AgentOutcome::Failed {
                        error: source.to_string(),
                    }
                }
            };
            replies.insert(agent, outcome);
        }
        Ok(replies)
    }
}

/// Reject empty rosters and duplicate names.
fn check_roster(agents: &[AgentSpec]) -> Result<(), RelayError> {
    if agents.is_empty() {
        return Err(RelayError::validation("at least one agent is required"));
    }
    let mut seen = HashSet::new();
    for agent in agents {
        if agent.name.trim().is_empty() {
            return Err(RelayError::validation("agent name must not be empty"));
        }
        if !seen.insert(agent.name.as_str()) {
            return Err(RelayError::validation(format!(
                "duplicate agent name: {}",
                agent.name
            )));
        }
    }
    Ok(())
}
