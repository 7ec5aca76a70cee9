//! Streaming relay from an upstream SSE body to a client response body.
//!
//! The relay is a pull-driven stream: every poll from the response writer
//! reads at most one upstream chunk, so nothing is buffered beyond the
//! parser's partial line. Dropping the relay drops the upstream reader, which
//! closes the upstream connection.

use std::convert::Infallible;

use bytes::Bytes;
use chat_relay_backend::{SseEvent, SseParser, fragment_text};
use chat_relay_core::ByteStream;
use futures::{Stream, StreamExt, stream};

/// Terminal frame sent to the client after a normal close.
pub const TERMINAL_FRAME: &[u8] = b"data: [DONE]\n\n";

/// How upstream chunks are rendered downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayPolicy {
    /// Forward upstream bytes unmodified.
    #[default]
    PassThrough,
    /// Emit the cumulative reply as `data: {"reply": "..."}` frames.
    Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Terminal,
    Closed,
}

struct RelayState<F> {
    upstream: ByteStream,
    parser: SseParser,
    policy: RelayPolicy,
    text: String,
    on_complete: Option<F>,
    phase: Phase,
}

impl<F: FnOnce(String)> RelayState<F> {
    /// Append the text of every decoded event; returns whether any was added.
    fn absorb(&mut self, events: impl IntoIterator<Item = SseEvent>) -> bool {
        let before = self.text.len();
        for event in events {
            if let SseEvent::Data(data) = event {
                if let Some(fragment) = fragment_text(&data) {
                    self.text.push_str(&fragment);
                }
            }
        }
        self.text.len() > before
    }

    fn complete(&mut self) {
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(self.text.clone());
        }
    }
}

/// Render a cumulative snapshot frame.
#[must_use]
pub fn snapshot_frame(text: &str) -> Bytes {
    Bytes::from(format!("data: {}\n\n", serde_json::json!({ "reply": text })))
}

/// Relay `upstream` to the client under `policy`.
///
/// When upstream closes normally, `on_complete` receives the accumulated
/// reply text exactly once and a terminal `[DONE]` frame follows (pass-through
/// skips it if upstream already sent one). An upstream read error ends the
/// stream without a terminal frame and without calling `on_complete`; so
/// does dropping the stream early.
pub fn relay<F>(
    upstream: ByteStream,
    policy: RelayPolicy,
    on_complete: F,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static
where
    F: FnOnce(String) + Send + 'static,
{
    let state = RelayState {
        upstream,
        parser: SseParser::new(),
        policy,
        text: String::new(),
        on_complete: Some(on_complete),
        phase: Phase::Open,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            match state.phase {
                Phase::Closed => return None,
                Phase::Terminal => {
                    if state.policy == RelayPolicy::PassThrough && state.parser.saw_done() {
                        return None;
                    }
                    state.phase = Phase::Closed;
                    return Some((Ok(Bytes::from_static(TERMINAL_FRAME)), state));
                }
                Phase::Open => {}
            }

            match state.upstream.next().await {
                Some(Ok(chunk)) => {
                    let events = state.parser.push(&chunk);
                    let grew = state.absorb(events);
                    match state.policy {
                        RelayPolicy::PassThrough => return Some((Ok(chunk), state)),
                        RelayPolicy::Snapshot if grew => {
                            let frame = snapshot_frame(&state.text);
                            return Some((Ok(frame), state));
                        }
                        RelayPolicy::Snapshot => {}
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, received = state.text.len(), "Upstream stream failed, closing relay");
                    return None;
                }
                None => {
                    let trailing = state.parser.finish();
                    let grew = state.absorb(trailing);
                    state.complete();
                    state.phase = Phase::Terminal;
                    tracing::debug!(reply_len = state.text.len(), "Upstream closed");
                    if state.policy == RelayPolicy::Snapshot && grew {
                        let frame = snapshot_frame(&state.text);
                        return Some((Ok(frame), state));
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chat_relay_core::BackendError;

    use super::*;

    fn upstream(chunks: &[&str]) -> ByteStream {
        let items: Vec<Result<Bytes, BackendError>> = chunks
            .iter()
            .map(|c| Ok(Bytes::from(c.to_string())))
            .collect();
        stream::iter(items).boxed()
    }

    fn failing(chunks: &[&str]) -> ByteStream {
        let mut items: Vec<Result<Bytes, BackendError>> = chunks
            .iter()
            .map(|c| Ok(Bytes::from(c.to_string())))
            .collect();
        items.push(Err(BackendError::Stream("connection reset".into())));
        stream::iter(items).boxed()
    }

    type Completed = Arc<Mutex<Vec<String>>>;

    fn recorder() -> (Completed, impl FnOnce(String) + Send + 'static) {
        let completed: Completed = Arc::default();
        let sink = Arc::clone(&completed);
        (completed, move |text| sink.lock().unwrap().push(text))
    }

    async fn collect(stream: impl Stream<Item = Result<Bytes, Infallible>>) -> String {
        let frames: Vec<Bytes> = stream.map(|r| r.unwrap()).collect().await;
        frames
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect()
    }

    const CHUNKS: &[&str] = &[
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Sa\"}}]}\n\ndata: {\"choices\":[{\"del",
        "ta\":{\"content\":\"lut\"}}]}\n\n",
        "data: [DONE]\n\n",
    ];

    #[tokio::test]
    async fn test_pass_through_forwards_bytes_verbatim() {
        let (completed, on_complete) = recorder();
        let out = collect(relay(upstream(CHUNKS), RelayPolicy::PassThrough, on_complete)).await;

        // Upstream already sent [DONE], so nothing is appended.
        assert_eq!(out, CHUNKS.concat());
        assert_eq!(*completed.lock().unwrap(), ["Salut"]);
    }

    #[tokio::test]
    async fn test_pass_through_appends_terminal_frame_when_missing() {
        let (_, on_complete) = recorder();
        let out = collect(relay(
            upstream(&CHUNKS[..3]),
            RelayPolicy::PassThrough,
            on_complete,
        ))
        .await;
        assert!(out.ends_with("data: [DONE]\n\n"));
        assert_eq!(out.matches("[DONE]").count(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_emits_cumulative_replies() {
        let (completed, on_complete) = recorder();
        let out = collect(relay(upstream(CHUNKS), RelayPolicy::Snapshot, on_complete)).await;

        assert_eq!(
            out,
            "data: {\"reply\":\"Sa\"}\n\n\
             data: {\"reply\":\"Salut\"}\n\n\
             data: [DONE]\n\n"
        );
        assert_eq!(*completed.lock().unwrap(), ["Salut"]);
    }

    #[tokio::test]
    async fn test_snapshot_flushes_unterminated_last_line() {
        let (completed, on_complete) = recorder();
        let out = collect(relay(
            upstream(&["data: \"Bon\"\n", "data: \"jour\""]),
            RelayPolicy::Snapshot,
            on_complete,
        ))
        .await;

        assert!(out.contains("{\"reply\":\"Bonjour\"}"));
        assert!(out.ends_with("data: [DONE]\n\n"));
        assert_eq!(*completed.lock().unwrap(), ["Bonjour"]);
    }

    #[tokio::test]
    async fn test_streamed_text_matches_sync_reply() {
        use chat_relay_backend::ChatCompletionsBackend;
        use chat_relay_core::{Backend, BackendRequest, ChatMessage};
        use serde_json::json;
        use wiremock::{Mock, MockServer, ResponseTemplate, matchers::body_partial_json};

        let reply = "Le cacao pousse à l'ombre.";
        let sse: String = reply
            .split_inclusive(' ')
            .map(|word| {
                format!(
                    "data: {}\n\n",
                    json!({"choices": [{"delta": {"content": word}}]})
                )
            })
            .chain(std::iter::once("data: [DONE]\n\n".to_string()))
            .collect();

        let server = MockServer::start().await;
        Mock::given(body_partial_json(json!({ "stream": false })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": reply}}]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(body_partial_json(json!({ "stream": true })))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let backend = ChatCompletionsBackend::new(None);
        let request = BackendRequest::new(server.uri(), "m", "sys", vec![ChatMessage::user("q")]);

        let sync = backend.complete(&request).await.unwrap();
        let upstream = backend.stream(&request).await.unwrap();
        let (completed, on_complete) = recorder();
        collect(relay(upstream, RelayPolicy::Snapshot, on_complete)).await;

        assert_eq!(sync, reply);
        assert_eq!(*completed.lock().unwrap(), [sync]);
    }

    #[tokio::test]
    async fn test_upstream_error_closes_without_completion() {
        let (completed, on_complete) = recorder();
        let out = collect(relay(
            failing(&CHUNKS[..2]),
            RelayPolicy::PassThrough,
            on_complete,
        ))
        .await;

        assert_eq!(out, CHUNKS[..2].concat());
        assert!(!out.contains("[DONE]"));
        assert!(completed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dropping_relay_skips_completion_and_releases_upstream() {
        let (completed, on_complete) = recorder();
        let alive = Arc::new(());
        let guard = Arc::clone(&alive);
        let upstream: ByteStream = stream::iter(CHUNKS.iter().map(|c| Ok(Bytes::from(c.to_string()))))
            .chain(stream::pending())
            .map(move |item| {
                let _held = &guard;
                item
            })
            .boxed();

        let mut relayed = Box::pin(relay(upstream, RelayPolicy::PassThrough, on_complete));
        assert!(relayed.next().await.is_some());
        assert_eq!(Arc::strong_count(&alive), 2);

        drop(relayed);
        assert_eq!(Arc::strong_count(&alive), 1);
        assert!(completed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_upstream_still_completes() {
        let (completed, on_complete) = recorder();
        let out = collect(relay(upstream(&[]), RelayPolicy::Snapshot, on_complete)).await;
        assert_eq!(out, "data: [DONE]\n\n");
        assert_eq!(*completed.lock().unwrap(), [""]);
    }
}
