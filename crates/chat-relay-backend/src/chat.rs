//! Chat-completions backend.
//!
//! Talks to any `POST {base}/v1/chat/completions` endpoint, either waiting for
//! the whole JSON reply or handing back the raw SSE byte stream.

use async_trait::async_trait;
use chat_relay_core::{Backend, BackendError, BackendRequest, ByteStream};
use futures::{StreamExt, TryStreamExt};
use tracing::{debug, instrument, warn};

use crate::protocol::{ChatCompletionRequest, ChatCompletionResponse};

/// Path appended to the configured base URL.
pub const COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Chat-completions backend client.
#[derive(Clone)]
pub struct ChatCompletionsBackend {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl ChatCompletionsBackend {
    /// Create a backend with its own HTTP client.
    ///
    /// No request timeout is set: callers cancel by dropping the call.
    #[must_use]
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_key)
    }

    /// Create a backend with a shared HTTP client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client, api_key: Option<String>) -> Self {
        Self { client, api_key }
    }

    fn url(endpoint: &str) -> String {
        format!("{}{COMPLETIONS_PATH}", endpoint.trim_end_matches('/'))
    }

    async fn send(&self, request: &BackendRequest) -> Result<reqwest::Response, BackendError> {
        let body = ChatCompletionRequest {
            model: &request.model,
            messages: request.messages(),
            stream: request.stream,
        };

        debug!(
            model = %request.model,
            message_count = request.messages().len(),
            stream = request.stream,
            "Sending chat-completions request"
        );

        let mut builder = self.client.post(Self::url(&request.endpoint)).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| crate::unreachable(&e))?;
        if !response.status().is_success() {
            return Err(crate::status_error(self.name(), response).await);
        }
        Ok(response)
    }
}

#[async_trait]
impl Backend for ChatCompletionsBackend {
    fn name(&self) -> &'static str {
        "chat-completions"
    }

    #[instrument(skip_all, fields(backend = "chat-completions", model = %request.model))]
    async fn complete(&self, request: &BackendRequest) -> Result<String, BackendError> {
        let request = request.clone().streaming(false);
        let response = self.send(&request).await?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| BackendError::Unreachable(e.to_string()))?;

        match serde_json::from_slice::<ChatCompletionResponse>(&bytes) {
            Ok(parsed) => Ok(parsed.into_reply().unwrap_or_else(|| {
                warn!("Reply field missing from backend response");
                String::new()
            })),
            Err(e) => {
                warn!(error = %e, "Backend response is not valid JSON");
                Ok(String::new())
            }
        }
    }

    #[instrument(skip_all, fields(backend = "chat-completions", model = %request.model))]
    async fn stream(&self, request: &BackendRequest) -> Result<ByteStream, BackendError> {
        let request = request.clone().streaming(true);
        let response = self.send(&request).await?;

        Ok(response
            .bytes_stream()
            .map_err(|e| BackendError::Stream(e.to_string()))
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use chat_relay_core::ChatMessage;
    use futures::TryStreamExt;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_partial_json, header, method, path},
    };

    use super::*;

    fn request(endpoint: &str) -> BackendRequest {
        BackendRequest::new(endpoint, "mistral-v0.3", "sys", vec![ChatMessage::user("Bonjour")])
    }

    #[tokio::test]
    async fn test_complete_returns_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(COMPLETIONS_PATH))
            .and(body_partial_json(serde_json::json!({
                "model": "mistral-v0.3",
                "stream": false,
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "Bonjour"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "Salut !"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = ChatCompletionsBackend::new(None);
        let reply = backend.complete(&request(&server.uri())).await.unwrap();
        assert_eq!(reply, "Salut !");
    }

    #[tokio::test]
    async fn test_bearer_token_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "ok"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = ChatCompletionsBackend::new(Some("sk-test".into()));
        assert_eq!(backend.complete(&request(&server.uri())).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_non_2xx_is_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("model loading"))
            .mount(&server)
            .await;

        let backend = ChatCompletionsBackend::new(None);
        let err = backend.complete(&request(&server.uri())).await.unwrap_err();
        match err {
            BackendError::Status { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "model loading");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_body_falls_back_to_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "unexpected": true
            })))
            .mount(&server)
            .await;

        let backend = ChatCompletionsBackend::new(None);
        assert_eq!(backend.complete(&request(&server.uri())).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_non_json_body_falls_back_to_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let backend = ChatCompletionsBackend::new(None);
        assert_eq!(backend.complete(&request(&server.uri())).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_unreachable_backend() {
        // Nothing listens on port 9 locally.
        let backend = ChatCompletionsBackend::new(None);
        let err = backend
            .complete(&request("http://127.0.0.1:9"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_stream_yields_raw_bytes() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Sa\"}}]}\n\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"lut\"}}]}\n\n\
                    data: [DONE]\n\n";
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({ "stream": true })))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let backend = ChatCompletionsBackend::new(None);
        let stream = backend.stream(&request(&server.uri())).await.unwrap();
        let chunks: Vec<bytes::Bytes> = stream.try_collect().await.unwrap();
        let raw: Vec<u8> = chunks.concat();
        assert_eq!(String::from_utf8(raw).unwrap(), body);
    }

    #[tokio::test]
    async fn test_stream_non_2xx_fails_before_streaming() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let backend = ChatCompletionsBackend::new(None);
        let result = backend.stream(&request(&server.uri())).await;
        assert!(matches!(
            result,
            Err(BackendError::Status { status: 429, .. })
        ));
    }
}
