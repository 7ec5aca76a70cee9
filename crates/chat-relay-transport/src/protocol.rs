//! JSON bodies of the HTTP API.

use chat_relay_core::{AgentSpec, ChatMessage, RelayError, Role};
use chat_relay_session::ChatTurn;
use serde::{Deserialize, Serialize};

/// Body of the chat routes.
///
/// Either `message` carries the user text, or `messages` carries the client's
/// conversation with the newest user entry last.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<ChatMessage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ChatRequest {
    /// Convert into a pipeline turn.
    ///
    /// # Errors
    /// Returns [`RelayError::InvalidSession`] without a session id and a
    /// validation error when no user text can be found.
    pub fn into_turn(self) -> Result<ChatTurn, RelayError> {
        let session_id = self
            .session_id
            .filter(|s| !s.trim().is_empty())
            .ok_or(RelayError::InvalidSession)?;

        let (text, history) = match (self.message, self.messages) {
            (Some(text), history) => (text, history),
            (None, Some(mut history)) => {
                let last_user = history.iter().rposition(|m| m.role == Role::User);
                let text = last_user.map(|i| history.remove(i).content);
                (text.unwrap_or_default(), Some(history))
            }
            (None, None) => (String::new(), None),
        };
        if text.trim().is_empty() {
            return Err(RelayError::validation("No message provided"));
        }

        let mut turn = ChatTurn::new(Some(session_id), text);
        if let Some(history) = history {
            turn = turn.with_history(history);
        }
        if let Some(request_id) = self.request_id {
            turn = turn.with_request_id(request_id);
        }
        Ok(turn)
    }
}

/// Body of `POST /api/multiChat`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiChatRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    /// Overrides the configured roster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agents: Option<Vec<AgentSpec>>,
}

impl MultiChatRequest {
    /// Session id and question, both required.
    ///
    /// # Errors
    /// Returns a validation error when either is missing or blank.
    pub fn require_fields(&self) -> Result<(&str, &str), RelayError> {
        fn present(v: &Option<String>) -> Option<&str> {
            v.as_deref().filter(|s| !s.trim().is_empty())
        }

        match (present(&self.session_id), present(&self.question)) {
            (Some(session), Some(question)) => Ok((session, question)),
            _ => Err(RelayError::validation(
                "sessionId and question are required",
            )),
        }
    }
}

/// Query of `GET /api/chat`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    #[serde(default)]
    pub session_id: Option<String>,
}

/// `{"reply": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyBody {
    pub reply: String,
}

/// `{"error": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
