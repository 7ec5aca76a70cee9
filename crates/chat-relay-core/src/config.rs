//! Relay configuration.
//!
//! Configuration is injected once at startup and validated on every call, so
//! a missing value surfaces as [`RelayError::Config`] instead of a crash.

use serde::{Deserialize, Serialize};

use crate::{error::RelayError, message::AgentSpec};

/// Default model identifier.
pub const DEFAULT_MODEL: &str = "mistral-v0.3";

/// Default history window.
pub const DEFAULT_MAX_HISTORY: usize = 20;

/// Default system prompt.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Default base URL for single-model inference endpoints.
pub const DEFAULT_INFERENCE_URL: &str = "https://api-inference.huggingface.co";

/// Which wire protocol the backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// `POST {base}/v1/chat/completions`.
    #[default]
    Chat,
    /// `POST {base}/models/{model}` with `{inputs}`.
    Inference,
}

/// How multi-agent fan-out treats a failed agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Any failed agent fails the whole call.
    AllOrNothing,
    /// Failed agents are reported per name next to the successful replies.
    #[default]
    Partial,
}

/// Raw relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub backend: BackendKind,
    pub base_url: Option<String>,
    pub model: String,
    pub system_prompt: String,
    pub max_history: usize,
    pub api_token: Option<String>,
    pub agent_policy: FailurePolicy,
    pub agents: Vec<AgentSpec>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Chat,
            base_url: None,
            model: DEFAULT_MODEL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_history: DEFAULT_MAX_HISTORY,
            api_token: None,
            agent_policy: FailurePolicy::Partial,
            agents: default_agents(),
        }
    }
}

/// Built-in agent roster.
#[must_use]
pub fn default_agents() -> Vec<AgentSpec> {
    vec![
        AgentSpec::new(
            "ExpertAgri",
            "You are an expert in Ivorian agriculture, specialist in cocoa and coffee farming.",
        ),
        AgentSpec::new(
            "DataAnalyst",
            "You are a data analyst. Given agricultural datasets, you provide insights and recommendations.",
        ),
    ]
}

impl RelayConfig {
    /// Create from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create from an arbitrary key lookup.
    ///
    /// Unparseable numbers and unknown enum values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend = match non_empty("CHATBOT_BACKEND").as_deref() {
            Some("inference") => BackendKind::Inference,
            Some("chat") | None => BackendKind::Chat,
            Some(other) => {
                tracing::warn!(value = other, "Unknown CHATBOT_BACKEND, using chat");
                BackendKind::Chat
            }
        };

        let agent_policy = match non_empty("CHATBOT_AGENT_POLICY").as_deref() {
            Some("all_or_nothing") => FailurePolicy::AllOrNothing,
            _ => FailurePolicy::Partial,
        };

        Self {
            backend,
            base_url: non_empty("CHATBOT_URL"),
            model: non_empty("CHATBOT_MODEL").unwrap_or(defaults.model),
            system_prompt: non_empty("CHATBOT_SYSTEM_PROMPT").unwrap_or(defaults.system_prompt),
            max_history: non_empty("CHATBOT_MAX_HISTORY")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.max_history),
            api_token: non_empty("CHATBOT_API_TOKEN").or_else(|| non_empty("HF_TOKEN")),
            agent_policy,
            agents: defaults.agents,
        }
    }

    /// Validate and resolve the values needed for one call.
    ///
    /// # Errors
    /// Returns [`RelayError::Config`] when a required value is missing.
    pub fn validate(&self) -> Result<ResolvedConfig, RelayError> {
        let base_url = match (self.backend, self.base_url.as_deref()) {
            (_, Some(url)) if !url.trim().is_empty() => url.trim_end_matches('/').to_string(),
            (BackendKind::Inference, _) => DEFAULT_INFERENCE_URL.to_string(),
            (BackendKind::Chat, _) => return Err(RelayError::config("CHATBOT_URL not set")),
        };

        if self.model.trim().is_empty() {
            return Err(RelayError::config("CHATBOT_MODEL not set"));
        }

        if self.backend == BackendKind::Inference && self.api_token.is_none() {
            return Err(RelayError::config("HF_TOKEN not set"));
        }

        Ok(ResolvedConfig {
            base_url,
            model: self.model.clone(),
            system_prompt: self.system_prompt.clone(),
            max_history: self.max_history,
        })
    }
}

/// Configuration values validated for a single call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub base_url: String,
    pub model: String,
    pub system_prompt: String,
    pub max_history: usize,
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_from_empty_env() {
        let config = RelayConfig::from_lookup(lookup(&[]));
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.max_history, DEFAULT_MAX_HISTORY);
        assert_eq!(config.backend, BackendKind::Chat);
        assert_eq!(config.agent_policy, FailurePolicy::Partial);
        assert_eq!(config.agents.len(), 2);
    }

    #[test]
    fn test_env_overrides() {
        let config = RelayConfig::from_lookup(lookup(&[
            ("CHATBOT_URL", "http://llm:8080/"),
            ("CHATBOT_MODEL", "llama3"),
            ("CHATBOT_MAX_HISTORY", "5"),
            ("CHATBOT_AGENT_POLICY", "all_or_nothing"),
            ("HF_TOKEN", "hf_x"),
        ]));
        assert_eq!(config.model, "llama3");
        assert_eq!(config.max_history, 5);
        assert_eq!(config.agent_policy, FailurePolicy::AllOrNothing);
        assert_eq!(config.api_token.as_deref(), Some("hf_x"));

        let resolved = config.validate().unwrap();
        assert_eq!(resolved.base_url, "http://llm:8080");
    }

    #[test]
    fn test_bad_max_history_falls_back() {
        let config = RelayConfig::from_lookup(lookup(&[("CHATBOT_MAX_HISTORY", "lots")]));
        assert_eq!(config.max_history, DEFAULT_MAX_HISTORY);
    }

    #[test]
    fn test_missing_url_is_config_error() {
        let err = RelayConfig::default().validate().unwrap_err();
        assert!(matches!(err, RelayError::Config(ref m) if m.contains("CHATBOT_URL")));
    }

    #[test]
    fn test_inference_requires_token() {
        let mut config = RelayConfig {
            backend: BackendKind::Inference,
            ..RelayConfig::default()
        };
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));

        config.api_token = Some("hf_x".into());
        let resolved = config.validate().unwrap();
        assert_eq!(resolved.base_url, DEFAULT_INFERENCE_URL);
    }
}
