//! Conversation data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session identifier, as supplied by the client.
pub type SessionId = String;

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions prepended to every backend request.
    System,
    /// A turn typed by the client.
    User,
    /// A turn produced by a backend.
    Assistant,
}

impl Role {
    /// Wire name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Parse a wire name back into a role.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message stamped with the current time.
    #[must_use]
    pub fn now(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// The `{role, content}` shape sent to backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

impl From<&Message> for ChatMessage {
    fn from(msg: &Message) -> Self {
        Self::new(msg.role, msg.content.clone())
    }
}

/// A conversation thread with its ordered history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    /// Time of the first message; `None` while the session has no history.
    pub created_at: Option<DateTime<Utc>>,
    pub messages: Vec<Message>,
}

impl Session {
    /// Assemble a session from its chronologically ordered messages.
    #[must_use]
    pub fn from_messages(id: impl Into<SessionId>, messages: Vec<Message>) -> Self {
        Self {
            id: id.into(),
            created_at: messages.first().map(|m| m.timestamp),
            messages,
        }
    }
}

/// A named persona used by multi-agent fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    #[serde(alias = "system", rename = "systemPrompt")]
    pub system_prompt: String,
}

impl AgentSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
        }
    }
}

/// A single outbound call to a backend.
///
/// The message list always starts with exactly one system message; build it
/// through [`BackendRequest::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendRequest {
    pub endpoint: String,
    pub model: String,
    messages: Vec<ChatMessage>,
    pub stream: bool,
}

impl BackendRequest {
    /// Build a request from a system prompt and the remaining conversation.
    ///
    /// System messages inside `conversation` are dropped.
    #[must_use]
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        conversation: impl IntoIterator<Item = ChatMessage>,
    ) -> Self {
        let mut messages = vec![ChatMessage::system(system_prompt)];
        messages.extend(conversation.into_iter().filter(|m| m.role != Role::System));
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            messages,
            stream: false,
        }
    }

    /// Set the streaming flag.
    #[must_use]
    pub const fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Ordered messages, system message first.
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// The leading system prompt.
    #[must_use]
    pub fn system_prompt(&self) -> &str {
        &self.messages[0].content
    }

    /// Content of the last user message, if any.
    #[must_use]
    pub fn last_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}
