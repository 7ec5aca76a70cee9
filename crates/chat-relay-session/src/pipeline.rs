//! The conversation pipeline: context builder → backend → persistence sink.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use bytes::Bytes;
use chat_relay_core::{
    Backend, BackendError, ByteStream, ChatMessage, ContextBuilder, MessageStore, RelayConfig,
    RelayError, Session,
};
use futures::{StreamExt, stream};

use crate::sink::PersistenceSink;

/// Number of `(session, request id)` replies remembered for retries.
const DEDUP_CAPACITY: usize = 1024;

type DedupKey = (String, String);

/// One inbound user turn.
#[derive(Debug, Clone, Default)]
pub struct ChatTurn {
    pub session_id: Option<String>,
    pub text: String,
    /// History supplied by the client, used only without persistence.
    pub history: Option<Vec<ChatMessage>>,
    /// Client-chosen key that makes retries of this turn idempotent.
    pub request_id: Option<String>,
}

impl ChatTurn {
    #[must_use]
    pub fn new(session_id: Option<String>, text: impl Into<String>) -> Self {
        Self {
            session_id,
            text: text.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = Some(history);
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    fn dedup_key(&self) -> Option<DedupKey> {
        Some((self.session_id.clone()?, self.request_id.clone()?))
    }
}

/// Persists a streamed turn once the stream has completed normally.
pub struct TurnCompletion {
    sink: Option<PersistenceSink>,
    session: Option<String>,
    user_text: String,
    dedup: Option<(Arc<Mutex<DedupCache>>, DedupKey)>,
}

impl TurnCompletion {
    /// Completion of a replayed turn: already persisted, nothing to do.
    fn replayed() -> Self {
        Self {
            sink: None,
            session: None,
            user_text: String::new(),
            dedup: None,
        }
    }

    /// Queue the user turn and the fully accumulated reply, and remember the
    /// reply for retries carrying the same request id.
    pub fn commit(self, reply: &str) {
        if let (Some(sink), Some(session)) = (&self.sink, &self.session) {
            sink.record_turn(session, &self.user_text, reply);
        }
        if let Some((cache, key)) = self.dedup {
            lock(&cache).insert(key, reply.to_string());
        }
    }
}

struct DedupCache {
    order: VecDeque<DedupKey>,
    replies: HashMap<DedupKey, String>,
}

impl DedupCache {
    fn new() -> Self {
        Self {
            order: VecDeque::new(),
            replies: HashMap::new(),
        }
    }

    fn get(&self, key: &DedupKey) -> Option<String> {
        self.replies.get(key).cloned()
    }

    fn insert(&mut self, key: DedupKey, reply: String) {
        if self.replies.insert(key.clone(), reply).is_none() {
            self.order.push_back(key);
        }
        while self.order.len() > DEDUP_CAPACITY {
            if let Some(old) = self.order.pop_front() {
                self.replies.remove(&old);
            }
        }
    }
}

/// Single configurable pipeline behind every chat route.
///
/// The backend is the dispatch strategy, the store and sink are the optional
/// persistence strategy; streaming callers pick a relay policy downstream.
pub struct ChatPipeline {
    config: Arc<RelayConfig>,
    backend: Arc<dyn Backend>,
    context: ContextBuilder,
    store: Option<Arc<dyn MessageStore>>,
    sink: Option<PersistenceSink>,
    dedup: Arc<Mutex<DedupCache>>,
}

impl ChatPipeline {
    /// Create a memoryless pipeline.
    #[must_use]
    pub fn new(config: Arc<RelayConfig>, backend: Arc<dyn Backend>) -> Self {
        Self {
            config,
            backend,
            context: ContextBuilder::memoryless(),
            store: None,
            sink: None,
            dedup: Arc::new(Mutex::new(DedupCache::new())),
        }
    }

    /// Read history from `store` and write turns through `sink`.
    #[must_use]
    pub fn with_persistence(mut self, store: Arc<dyn MessageStore>, sink: PersistenceSink) -> Self {
        self.context = ContextBuilder::new(Some(Arc::clone(&store)));
        self.store = Some(store);
        self.sink = Some(sink);
        self
    }

    #[must_use]
    pub fn config(&self) -> &Arc<RelayConfig> {
        &self.config
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Send a turn and wait for the full reply.
    ///
    /// # Errors
    /// Returns config, validation, session or backend errors. Persistence
    /// failures are never returned.
    pub async fn reply(&self, turn: ChatTurn) -> Result<String, RelayError> {
        let config = self.config.validate()?;
        validate_text(&turn.text)?;

        let key = turn.dedup_key();
        if let Some(cached) = key.as_ref().and_then(|k| lock(&self.dedup).get(k)) {
            tracing::info!(session = ?turn.session_id, "Replaying reply for repeated request id");
            return Ok(cached);
        }

        let request = self
            .context
            .build(
                &config,
                turn.session_id.as_deref(),
                turn.history.as_deref(),
                &turn.text,
            )
            .await?;

        let reply = self.backend.complete(&request).await?;
        tracing::debug!(
            backend = self.backend.name(),
            reply_len = reply.len(),
            "Backend replied"
        );

        if let (Some(sink), Some(session)) = (&self.sink, turn.session_id.as_deref()) {
            sink.record_turn(session, &turn.text, &reply);
        }
        if let Some(key) = key {
            lock(&self.dedup).insert(key, reply.clone());
        }

        Ok(reply)
    }

    /// Send a turn and return the upstream stream.
    ///
    /// The turn is persisted only if the caller commits the returned
    /// [`TurnCompletion`] after the stream ended normally. A repeated request
    /// id gets the remembered reply as a single SSE frame, without dispatch.
    ///
    /// # Errors
    /// Returns config, validation, session or backend errors raised before
    /// the first byte.
    pub async fn open_stream(
        &self,
        turn: ChatTurn,
    ) -> Result<(ByteStream, TurnCompletion), RelayError> {
        let config = self.config.validate()?;
        validate_text(&turn.text)?;

        let key = turn.dedup_key();
        if let Some(cached) = key.as_ref().and_then(|k| lock(&self.dedup).get(k)) {
            tracing::info!(session = ?turn.session_id, "Replaying streamed reply for repeated request id");
            return Ok((replay_stream(&cached), TurnCompletion::replayed()));
        }

        let request = self
            .context
            .build(
                &config,
                turn.session_id.as_deref(),
                turn.history.as_deref(),
                &turn.text,
            )
            .await?
            .streaming(true);

        let upstream = self.backend.stream(&request).await?;
        let completion = TurnCompletion {
            sink: self.sink.clone(),
            session: turn.session_id,
            user_text: turn.text,
            dedup: key.map(|k| (Arc::clone(&self.dedup), k)),
        };
        Ok((upstream, completion))
    }

    /// Ordered history of a session; empty without persistence.
    pub async fn history(&self, session: &str) -> Session {
        let Some(store) = &self.store else {
            return Session::from_messages(session, Vec::new());
        };
        match store.load_session(session).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(session, "Failed to load history: {e}");
                Session::from_messages(session, Vec::new())
            }
        }
    }
}

fn lock(cache: &Mutex<DedupCache>) -> MutexGuard<'_, DedupCache> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A finished reply as an SSE body: one data frame, then `[DONE]`.
fn replay_stream(reply: &str) -> ByteStream {
    let body = format!(
        "data: {}\n\ndata: [DONE]\n\n",
        serde_json::Value::String(reply.to_string())
    );
    stream::iter([Ok::<_, BackendError>(Bytes::from(body))]).boxed()
}

fn validate_text(text: &str) -> Result<(), RelayError> {
    if text.trim().is_empty() {
        return Err(RelayError::validation("No message provided"));
    }
    Ok(())
}
