//! Axum routes for the chat relay.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chat_relay_core::{RelayError, Session};
use chat_relay_session::{AgentReplies, ChatPipeline, MultiAgentOrchestrator};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

use crate::{
    error::ApiError,
    protocol::{ChatRequest, HistoryQuery, MultiChatRequest, ReplyBody},
    relay::{RelayPolicy, relay},
};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ChatPipeline>,
    pub orchestrator: Arc<MultiAgentOrchestrator>,
}

impl AppState {
    #[must_use]
    pub fn new(pipeline: ChatPipeline, orchestrator: MultiAgentOrchestrator) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            orchestrator: Arc::new(orchestrator),
        }
    }
}

/// Build the HTTP router.
///
/// Routes:
/// - `POST /api/chat` and `GET /api/chat?sessionId=`
/// - `POST /api/chat/stream` (upstream SSE forwarded as-is)
/// - `POST /api/chat/snapshot` (cumulative `{reply}` frames)
/// - `POST /api/multiChat`
/// - `GET /health`
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat).get(history))
        .route("/api/chat/stream", post(chat_stream))
        .route("/api/chat/snapshot", post(chat_snapshot))
        .route("/api/multiChat", post(multi_chat))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ReplyBody>, ApiError> {
    let Json(request) = payload?;
    let reply = state.pipeline.reply(request.into_turn()?).await?;
    Ok(Json(ReplyBody { reply }))
}

async fn history(
    State(state): State<AppState>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Session>, ApiError> {
    let Query(query) = query?;
    let session = query
        .session_id
        .filter(|s| !s.trim().is_empty())
        .ok_or(RelayError::InvalidSession)?;
    Ok(Json(state.pipeline.history(&session).await))
}

async fn chat_stream(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    stream_reply(&state, request, RelayPolicy::PassThrough).await
}

async fn chat_snapshot(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    stream_reply(&state, request, RelayPolicy::Snapshot).await
}

/// Open the upstream stream and answer with an SSE body.
///
/// Errors before the first upstream byte become regular JSON error responses;
/// after that the status is committed and failures only close the body.
async fn stream_reply(
    state: &AppState,
    request: ChatRequest,
    policy: RelayPolicy,
) -> Result<Response, ApiError> {
    let (upstream, completion) = state.pipeline.open_stream(request.into_turn()?).await?;
    let body = relay(upstream, policy, move |reply| completion.commit(&reply));

    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(body),
    )
        .into_response())
}

async fn multi_chat(
    State(state): State<AppState>,
    payload: Result<Json<MultiChatRequest>, JsonRejection>,
) -> Result<Json<AgentReplies>, ApiError> {
    let Json(request) = payload?;
    let (session, question) = request.require_fields()?;

    let agents = request
        .agents
        .as_deref()
        .unwrap_or_else(|| state.orchestrator.default_agents());
    tracing::debug!(session, agents = agents.len(), "Fanning out question");

    let replies = state.orchestrator.ask(question, agents).await?;
    Ok(Json(replies))
}
