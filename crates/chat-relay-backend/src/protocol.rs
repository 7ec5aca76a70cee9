//! Wire types for the outbound backend protocols.

use chat_relay_core::{ChatMessage, Role};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Chat-completions request body.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub stream: bool,
}

/// Chat-completions sync response.
///
/// Every field is optional so that a body missing the reply still parses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub message: Option<ChoiceContent>,
    #[serde(default)]
    pub delta: Option<ChoiceContent>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChoiceContent {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletionResponse {
    /// `choices[0].message.content`.
    #[must_use]
    pub fn into_reply(self) -> Option<String> {
        self.choices.into_iter().next()?.message?.content
    }
}

/// Single-model inference request body.
#[derive(Debug, Clone, Serialize)]
pub struct InferenceRequest {
    pub inputs: String,
}

/// One generated candidate of an inference response.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedText {
    #[serde(default)]
    pub generated_text: Option<String>,
}

/// Extract `[0].generated_text` from an inference response body.
#[must_use]
pub fn inference_reply(body: &Value) -> Option<String> {
    let first = body.as_array()?.first()?.clone();
    let generated: GeneratedText = serde_json::from_value(first).ok()?;
    generated.generated_text.map(|t| t.trim().to_string())
}

/// Flatten a conversation into a single prompt for text-to-text models.
///
/// The system prompt leads, prior turns follow as `role: content` lines, and
/// the final user message closes the prompt unlabeled.
#[must_use]
pub fn flatten_prompt(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    let last_user = messages.iter().rposition(|m| m.role == Role::User);

    for (i, msg) in messages.iter().enumerate() {
        match msg.role {
            Role::System => {
                prompt.push_str(&msg.content);
                prompt.push_str("\n\n");
            }
            _ if Some(i) == last_user => prompt.push_str(&msg.content),
            role => {
                prompt.push_str(role.as_str());
                prompt.push_str(": ");
                prompt.push_str(&msg.content);
                prompt.push('\n');
            }
        }
    }
    prompt
}

/// Frame one text fragment as a chat-completions SSE delta event.
#[must_use]
pub fn delta_event(text: &str) -> String {
    let chunk = serde_json::json!({
        "choices": [{ "delta": { "content": text } }]
    });
    format!("data: {chunk}\n\n")
}
