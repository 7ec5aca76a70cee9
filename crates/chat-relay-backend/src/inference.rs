//! Single-model inference backend.
//!
//! Speaks the `POST {base}/models/{model}` protocol: `{inputs}` in,
//! `[{generated_text}]` out. The endpoint has no streaming mode, so
//! [`Backend::stream`] runs a sync call and replays the reply as one SSE delta.

use async_trait::async_trait;
use bytes::Bytes;
use chat_relay_core::{Backend, BackendError, BackendRequest, ByteStream};
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::protocol::{InferenceRequest, delta_event, flatten_prompt, inference_reply};
use crate::sse::DONE_MARKER;

/// Single-model inference backend client.
#[derive(Clone)]
pub struct InferenceBackend {
    client: reqwest::Client,
    token: String,
}

impl InferenceBackend {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), token)
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client, token: impl Into<String>) -> Self {
        Self {
            client,
            token: token.into(),
        }
    }

    fn url(request: &BackendRequest) -> String {
        format!(
            "{}/models/{}",
            request.endpoint.trim_end_matches('/'),
            request.model
        )
    }
}

#[async_trait]
impl Backend for InferenceBackend {
    fn name(&self) -> &'static str {
        "inference"
    }

    #[instrument(skip_all, fields(backend = "inference", model = %request.model))]
    async fn complete(&self, request: &BackendRequest) -> Result<String, BackendError> {
        let body = InferenceRequest {
            inputs: flatten_prompt(request.messages()),
        };
        debug!(prompt_len = body.inputs.len(), "Sending inference request");

        let response = self
            .client
            .post(Self::url(request))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| crate::unreachable(&e))?;

        if !response.status().is_success() {
            return Err(crate::status_error(self.name(), response).await);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| BackendError::Unreachable(e.to_string()))?;

        let reply = serde_json::from_slice::<Value>(&bytes)
            .ok()
            .as_ref()
            .and_then(inference_reply);
        Ok(reply.unwrap_or_else(|| {
            warn!("generated_text missing from inference response");
            String::new()
        }))
    }

    async fn stream(&self, request: &BackendRequest) -> Result<ByteStream, BackendError> {
        let reply = self.complete(request).await?;
        let framed = format!("{}data: {DONE_MARKER}\n\n", delta_event(&reply));
        Ok(futures::stream::once(async move { Ok(Bytes::from(framed)) }).boxed())
    }
}

#[cfg(test)]
mod tests {
    use chat_relay_core::ChatMessage;
    use futures::TryStreamExt;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_json, header, method, path},
    };

    use super::*;
    use crate::sse::{SseEvent, SseParser, fragment_text};

    fn request(endpoint: &str) -> BackendRequest {
        BackendRequest::new(
            endpoint,
            "google/flan-t5-small",
            "Be brief.",
            vec![ChatMessage::user("Bonjour")],
        )
    }

    #[tokio::test]
    async fn test_complete_posts_inputs_with_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/google/flan-t5-small"))
            .and(header("authorization", "Bearer hf_test"))
            .and(body_json(serde_json::json!({ "inputs": "Be brief.\n\nBonjour" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([{ "generated_text": " Salut " }])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let backend = InferenceBackend::new("hf_test");
        let reply = backend.complete(&request(&server.uri())).await.unwrap();
        assert_eq!(reply, "Salut");
    }

    #[tokio::test]
    async fn test_status_error_surfaces_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("Model is loading"))
            .mount(&server)
            .await;

        let backend = InferenceBackend::new("hf_test");
        let err = backend.complete(&request(&server.uri())).await.unwrap_err();
        assert!(matches!(
            err,
            BackendError::Status { status: 503, ref body } if body == "Model is loading"
        ));
    }

    #[tokio::test]
    async fn test_missing_generated_text_is_empty_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let backend = InferenceBackend::new("hf_test");
        assert_eq!(backend.complete(&request(&server.uri())).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_stream_replays_reply_as_single_delta() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([{ "generated_text": "Salut" }])),
            )
            .mount(&server)
            .await;

        let backend = InferenceBackend::new("hf_test");
        let chunks: Vec<Bytes> = backend
            .stream(&request(&server.uri()))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks.len(), 1);

        let mut parser = SseParser::new();
        let events = parser.push(&chunks[0]);
        assert_eq!(events.len(), 2);
        let SseEvent::Data(ref data) = events[0] else {
            panic!("expected data event");
        };
        assert_eq!(fragment_text(data).as_deref(), Some("Salut"));
        assert_eq!(events[1], SseEvent::Done);
    }
}
