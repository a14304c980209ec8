//! HTTP API v1: question answering over the agentic workflow.
//!
//! Endpoints:
//!
//! - `POST   /v1/chat`         : Ask a question, get the rendered answer
//! - `POST   /v1/chat/stream`  : Ask a question, get an SSE stream (`meta`, `chunk`, `done`)
//! - `GET    /v1/routes`       : Effective backend per workflow step
//! - `GET    /v1/traces`       : Recent turn traces and usage totals
//! - `GET    /v1/traces/{id}`  : One full turn trace
//! - `DELETE /v1/threads/{id}` : Forget a thread's history and traces

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    response::sse::{Event as SseEvent, Sse},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use loresmith_core::error::HistoryError;
use loresmith_core::history::HistoryStore;
use loresmith_core::message::{Message, ThreadId};
use loresmith_core::persona::{Persona, PersonaKind};
use loresmith_providers::RouteInfo;
use loresmith_telemetry::{TurnRecorder, TurnTrace, UsageSnapshot};
use loresmith_workflow::{AgenticWorkflow, SubQuery, TurnState};

// ── State ─────────────────────────────────────────────────────────────────

/// Most traces listed by `GET /v1/traces`.
const TRACE_PAGE: usize = 50;
/// Longest accepted question, in characters.
const MAX_MESSAGE_CHARS: usize = 4_000;

/// Shared state for the v1 API.
pub struct ApiV1State {
    pub workflow: AgenticWorkflow,
    pub history: Arc<dyn HistoryStore>,
    pub recorder: Arc<TurnRecorder>,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

pub type SharedApiState = Arc<ApiV1State>;

// ── Router ────────────────────────────────────────────────────────────────

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedApiState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/chat/stream", post(chat_stream_handler))
        .route("/routes", get(routes_handler))
        .route("/traces", get(list_traces_handler))
        .route("/traces/{id}", get(get_trace_handler))
        .route("/threads/{id}", delete(delete_thread_handler))
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    /// Omit to start a new thread.
    #[serde(default)]
    thread_id: Option<String>,
    /// `scribe` or `devil`; the configured default when omitted.
    #[serde(default)]
    persona: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct SubQueryDto {
    text: String,
    original_text: String,
    status: String,
    sources: Vec<String>,
    refinement_count: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<&SubQuery> for SubQueryDto {
    fn from(sq: &SubQuery) -> Self {
        Self {
            text: sq.text.clone(),
            original_text: sq.original_text.clone(),
            status: sq.status().to_string(),
            sources: sq.sources.clone(),
            refinement_count: sq.refinement_count(),
            error: sq.error.as_ref().map(|e| e.to_string()),
        }
    }
}

/// Turn metadata shared by `/chat` and the stream's `meta` event.
#[derive(Serialize, Deserialize)]
struct TurnMeta {
    thread_id: String,
    complexity: String,
    subqueries: Vec<SubQueryDto>,
    sources: Vec<String>,
}

impl From<&TurnState> for TurnMeta {
    fn from(state: &TurnState) -> Self {
        Self {
            thread_id: state.thread_id.to_string(),
            complexity: state.complexity.to_string(),
            subqueries: state.subqueries.iter().map(SubQueryDto::from).collect(),
            sources: state.sources(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ChatResponse {
    answer: String,
    #[serde(flatten)]
    meta: TurnMeta,
}

#[derive(Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: error.into() }))
}

// ── Turn preparation ──────────────────────────────────────────────────────

/// A validated chat request with its history restored.
struct PreparedTurn {
    workflow: AgenticWorkflow,
    thread_id: ThreadId,
    message: String,
    history: Vec<Message>,
}

async fn prepare_turn(state: &ApiV1State, payload: ChatRequest) -> Result<PreparedTurn, ApiError> {
    let message = payload.message.trim().to_string();
    if message.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "message must not be empty"));
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(api_error(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("message exceeds {MAX_MESSAGE_CHARS} characters"),
        ));
    }

    let workflow = match payload.persona.as_deref() {
        Some(name) => {
            let kind: PersonaKind = name
                .parse()
                .map_err(|e: String| api_error(StatusCode::BAD_REQUEST, e))?;
            state.workflow.clone().with_persona(Persona::builtin(kind))
        }
        None => state.workflow.clone(),
    };

    let thread_id = payload
        .thread_id
        .filter(|t| !t.trim().is_empty())
        .map(|t| ThreadId::from(t.trim()))
        .unwrap_or_else(ThreadId::new);

    let history = match state.history.load(&thread_id).await {
        Ok(history) => history,
        Err(HistoryError::InvalidThread(reason)) => {
            return Err(api_error(StatusCode::BAD_REQUEST, reason));
        }
        Err(e) => {
            warn!(thread_id = %thread_id, error = %e, "History unavailable, answering without it");
            Vec::new()
        }
    };

    Ok(PreparedTurn {
        workflow,
        thread_id,
        message,
        history,
    })
}

/// Persist the exchange. A storage failure costs the history, not the answer.
async fn remember(history: &dyn HistoryStore, thread_id: &ThreadId, question: &str, answer: &str) {
    let exchange = vec![Message::user(question), Message::assistant(answer)];
    if let Err(e) = history.append(thread_id, exchange).await {
        warn!(thread_id = %thread_id, error = %e, "Failed to store exchange");
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn chat_handler(
    State(state): State<SharedApiState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let turn = prepare_turn(&state, payload).await?;
    info!(thread_id = %turn.thread_id, persona = %turn.workflow.persona().kind, "v1/chat request");

    let outcome = turn
        .workflow
        .process_turn(&turn.message, &turn.history, &turn.thread_id)
        .await;
    remember(state.history.as_ref(), &turn.thread_id, &turn.message, &outcome.answer).await;

    Ok(Json(ChatResponse {
        answer: outcome.answer,
        meta: TurnMeta::from(&outcome.state),
    }))
}

// ── SSE Streaming ─────────────────────────────────────────────────────────

/// `POST /v1/chat/stream`: one `meta` event once the turn is resolved, one
/// `chunk` per rendered fragment, then `done` with the full answer.
async fn chat_stream_handler(
    State(state): State<SharedApiState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let turn = prepare_turn(&state, payload).await?;
    info!(thread_id = %turn.thread_id, "v1/chat/stream SSE request");

    let mut stream = turn
        .workflow
        .process_turn_stream(&turn.message, &turn.history, &turn.thread_id)
        .await;
    let meta = TurnMeta::from(&stream.state);

    let (tx, rx) = mpsc::channel::<(&'static str, serde_json::Value)>(64);
    let history = state.history.clone();
    tokio::spawn(async move {
        let _ = tx.send(("meta", serde_json::to_value(&meta).unwrap_or_default())).await;

        let mut answer = String::new();
        while let Some(chunk) = stream.chunks.recv().await {
            answer.push_str(&chunk);
            if tx.send(("chunk", serde_json::json!({ "content": chunk }))).await.is_err() {
                // Client went away; keep draining so the turn still completes.
                continue;
            }
        }

        remember(history.as_ref(), &turn.thread_id, &turn.message, &answer).await;
        let _ = tx
            .send((
                "done",
                serde_json::json!({ "thread_id": turn.thread_id.as_str(), "answer": answer }),
            ))
            .await;
    });

    let events = ReceiverStream::new(rx)
        .map(|(name, data)| Ok(SseEvent::default().event(name).data(data.to_string())));
    Ok(Sse::new(events))
}

// ── Routing / Traces / Threads ────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct RoutesResponse {
    user_backend: String,
    retriever: String,
    routes: Vec<serde_json::Value>,
}

async fn routes_handler(State(state): State<SharedApiState>) -> Json<RoutesResponse> {
    let router = state.workflow.router();
    let routes = router
        .describe()
        .iter()
        .map(|r: &RouteInfo| serde_json::to_value(r).unwrap_or_default())
        .collect();
    Json(RoutesResponse {
        user_backend: router.user_backend().label(),
        retriever: state.workflow.retriever_name().to_string(),
        routes,
    })
}

#[derive(Serialize, Deserialize)]
struct TraceListResponse {
    count: usize,
    usage: UsageSnapshot,
    uptime_secs: i64,
    traces: Vec<TraceSummaryDto>,
}

#[derive(Serialize, Deserialize)]
struct TraceSummaryDto {
    id: String,
    thread_id: String,
    query_preview: String,
    complexity: Option<String>,
    subqueries: usize,
    failed: usize,
    steps: usize,
    fallbacks: usize,
    errors: usize,
    duration_ms: Option<u64>,
    started_at: String,
    ended: bool,
}

impl From<&TurnTrace> for TraceSummaryDto {
    fn from(t: &TurnTrace) -> Self {
        Self {
            id: t.id.clone(),
            thread_id: t.thread_id.clone(),
            query_preview: t.query_preview.clone(),
            complexity: t.complexity.clone(),
            subqueries: t.subquery_count,
            failed: t.failed_subqueries,
            steps: t.steps.len(),
            fallbacks: t.fallback_count(),
            errors: t.errors.len(),
            duration_ms: t.duration_ms,
            started_at: t.started_at.to_rfc3339(),
            ended: t.is_complete(),
        }
    }
}

async fn list_traces_handler(State(state): State<SharedApiState>) -> Json<TraceListResponse> {
    let traces: Vec<TraceSummaryDto> = state
        .recorder
        .recent(TRACE_PAGE)
        .iter()
        .map(TraceSummaryDto::from)
        .collect();
    Json(TraceListResponse {
        count: traces.len(),
        usage: state.recorder.usage_snapshot(),
        uptime_secs: (chrono::Utc::now() - state.start_time).num_seconds(),
        traces,
    })
}

async fn get_trace_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
) -> Result<Json<TurnTrace>, ApiError> {
    state
        .recorder
        .trace(&id)
        .map(Json)
        .map_err(|e| api_error(StatusCode::NOT_FOUND, e.to_string()))
}

#[derive(Serialize, Deserialize)]
struct DeleteThreadResponse {
    thread_id: String,
    cleared: bool,
    traces_removed: usize,
}

async fn delete_thread_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteThreadResponse>, ApiError> {
    let thread_id = ThreadId::from(id.as_str());
    let cleared = state.history.clear(&thread_id).await.map_err(|e| match e {
        HistoryError::InvalidThread(reason) => api_error(StatusCode::BAD_REQUEST, reason),
        HistoryError::Storage(reason) => api_error(StatusCode::INTERNAL_SERVER_ERROR, reason),
    })?;
    let traces_removed = state.recorder.forget_thread(&id);
    info!(thread_id = %thread_id, cleared, traces_removed, "Thread deleted");

    Ok(Json(DeleteThreadResponse {
        thread_id: id,
        cleared,
        traces_removed,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use loresmith_core::error::ProviderError;
    use loresmith_core::event::EventBus;
    use loresmith_core::provider::{Backend, Provider, ProviderRequest, ProviderResponse};
    use loresmith_core::retrieval::Passage;
    use loresmith_memory::{Corpus, FileHistory, InMemoryHistory, KeywordRetriever};
    use loresmith_providers::BackendRouter;

    /// Answers every workflow step from one provider, keyed on the prompt.
    struct ScriptedProvider {
        decomposition: String,
    }

    impl ScriptedProvider {
        fn simple() -> Self {
            Self {
                decomposition: r#"{"query_type": "simple"}"#.into(),
            }
        }

        fn composite() -> Self {
            Self {
                decomposition: r#"{"query_type": "complex",
                    "subqueries": ["What is the capital of Lyria?", "What currency does Lyria use?"]}"#
                    .into(),
            }
        }

        fn reply(&self, prompt: &str) -> String {
            if prompt.contains("\"query_type\"") {
                self.decomposition.clone()
            } else if prompt.starts_with("Evaluate if") {
                r#"{"sufficient": true, "reasoning": "covered"}"#.into()
            } else if prompt.starts_with("Answer the following question") {
                if prompt.contains("currency") {
                    "The silver crown.".into()
                } else {
                    "Aster.".into()
                }
            } else if prompt.contains("contradict") {
                "Aster, and the silver crown.".into()
            } else {
                "By the ancient scrolls: Aster.".into()
            }
        }
    }

    #[async_trait::async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "gateway_mock"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            let prompt = request
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Ok(ProviderResponse {
                message: Message::assistant(self.reply(&prompt)),
                usage: None,
                model: "mock-model".into(),
            })
        }
    }

    fn test_api_state(provider: ScriptedProvider) -> SharedApiState {
        state_with(provider, KeywordRetriever::new(), Arc::new(InMemoryHistory::new()))
    }

    fn state_with(
        provider: ScriptedProvider,
        retriever: KeywordRetriever,
        history: Arc<dyn HistoryStore>,
    ) -> SharedApiState {
        let router = Arc::new(BackendRouter::new(Backend::new(Arc::new(provider), "mock-model")));
        let bus = Arc::new(EventBus::default());
        let recorder = Arc::new(TurnRecorder::default());
        recorder.spawn(&bus);

        Arc::new(ApiV1State {
            workflow: AgenticWorkflow::new(router, Arc::new(retriever)).with_event_bus(bus),
            history,
            recorder,
            start_time: chrono::Utc::now(),
        })
    }

    fn lyria_corpus() -> KeywordRetriever {
        KeywordRetriever::from_corpus(Corpus::from_passages(vec![
            Passage::new("Aster is the capital of Lyria.", "atlas/lyria.md"),
            Passage::new("Lyria mints the silver crown as its currency.", "coins/lyria.md"),
        ]))
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn chat_composite_question() {
        let state = state_with(
            ScriptedProvider::composite(),
            lyria_corpus(),
            Arc::new(InMemoryHistory::new()),
        );
        let app = v1_router(state.clone());

        let response = app
            .oneshot(post_json(
                "/chat",
                serde_json::json!({
                    "message": "What is the capital of Lyria and what currency does it use?",
                    "thread_id": "lyria"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json: ChatResponse = body_json(response).await;
        assert_eq!(json.answer, "By the ancient scrolls: Aster.");
        assert_eq!(json.meta.thread_id, "lyria");
        assert_eq!(json.meta.complexity, "composite");
        assert_eq!(json.meta.subqueries.len(), 2);
        assert!(json.meta.subqueries.iter().all(|sq| sq.status == "complete"));
        assert_eq!(json.meta.subqueries[0].sources.first().map(String::as_str), Some("atlas/lyria.md"));
        assert_eq!(json.meta.subqueries[1].sources.first().map(String::as_str), Some("coins/lyria.md"));
        assert!(json.meta.sources.contains(&"coins/lyria.md".to_string()));

        let stored = state.history.load(&ThreadId::from("lyria")).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].content, "By the ancient scrolls: Aster.");
    }

    #[tokio::test]
    async fn chat_new_thread_gets_an_id() {
        let app = v1_router(test_api_state(ScriptedProvider::simple()));

        let response = app
            .oneshot(post_json("/chat", serde_json::json!({ "message": "Who founded Lyria?" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json: ChatResponse = body_json(response).await;
        assert_eq!(json.meta.complexity, "atomic");
        assert!(!json.meta.thread_id.is_empty());
        assert_ne!(json.meta.thread_id, "default");
        // Empty corpus: the subquery completes with the no-information result.
        assert_eq!(json.meta.subqueries[0].status, "complete");
        assert_eq!(json.meta.subqueries[0].refinement_count, 1);
    }

    #[tokio::test]
    async fn chat_rejects_empty_message() {
        let app = v1_router(test_api_state(ScriptedProvider::simple()));

        let response = app
            .oneshot(post_json("/chat", serde_json::json!({ "message": "   " })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json: ErrorResponse = body_json(response).await;
        assert!(json.error.contains("empty"));
    }

    #[tokio::test]
    async fn chat_rejects_unknown_persona() {
        let app = v1_router(test_api_state(ScriptedProvider::simple()));

        let response = app
            .oneshot(post_json(
                "/chat",
                serde_json::json!({ "message": "Hello", "persona": "pirate" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json: ErrorResponse = body_json(response).await;
        assert!(json.error.contains("pirate"));
    }

    #[tokio::test]
    async fn chat_rejects_unsafe_thread_id() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(
            ScriptedProvider::simple(),
            KeywordRetriever::new(),
            Arc::new(FileHistory::new(dir.path())),
        );

        let response = v1_router(state)
            .oneshot(post_json(
                "/chat",
                serde_json::json!({ "message": "Hello", "thread_id": "../escape" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn chat_stream_emits_meta_chunks_done() {
        let state = test_api_state(ScriptedProvider::simple());
        let app = v1_router(state.clone());

        let response = app
            .oneshot(post_json(
                "/chat/stream",
                serde_json::json!({ "message": "Who founded Lyria?", "thread_id": "s1", "persona": "devil" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        assert!(content_type.contains("text/event-stream"));

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8_lossy(&body);
        let meta = text.find("event: meta").unwrap();
        let chunk = text.find("event: chunk").unwrap();
        let done = text.find("event: done").unwrap();
        assert!(meta < chunk && chunk < done);
        assert!(text.contains("\"complexity\":\"atomic\""));
        assert!(text.contains("By the ancient scrolls: Aster."));

        let stored = state.history.load(&ThreadId::from("s1")).await.unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn routes_lists_every_step() {
        let app = v1_router(test_api_state(ScriptedProvider::simple()));

        let response = app
            .oneshot(Request::builder().uri("/routes").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json: RoutesResponse = body_json(response).await;
        assert_eq!(json.user_backend, "gateway_mock/mock-model");
        assert_eq!(json.retriever, "keyword");
        assert_eq!(json.routes.len(), 6);
        assert_eq!(json.routes[0]["step"], "decomposition");
        assert_eq!(json.routes[5]["step"], "response");
    }

    #[tokio::test]
    async fn traces_follow_turns() {
        let state = test_api_state(ScriptedProvider::simple());

        v1_router(state.clone())
            .oneshot(post_json(
                "/chat",
                serde_json::json!({ "message": "Who founded Lyria?", "thread_id": "traced" }),
            ))
            .await
            .unwrap();

        // The recorder runs on its own task; give it a moment to drain.
        for _ in 0..50 {
            if !state.recorder.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let response = v1_router(state.clone())
            .oneshot(Request::builder().uri("/traces").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json: TraceListResponse = body_json(response).await;
        assert_eq!(json.count, 1);
        assert_eq!(json.traces[0].thread_id, "traced");
        assert_eq!(json.traces[0].complexity.as_deref(), Some("atomic"));
        assert!(json.traces[0].ended);
        assert_eq!(json.usage.turns, 1);

        let id = json.traces[0].id.clone();
        let response = v1_router(state.clone())
            .oneshot(Request::builder().uri(format!("/traces/{id}")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let trace: TurnTrace = body_json(response).await;
        assert!(trace.step_count("decomposition") == 1);
    }

    #[tokio::test]
    async fn unknown_trace_is_404() {
        let app = v1_router(test_api_state(ScriptedProvider::simple()));
        let response = app
            .oneshot(Request::builder().uri("/traces/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_thread_clears_history() {
        let state = test_api_state(ScriptedProvider::simple());
        state
            .history
            .append(&ThreadId::from("gone"), vec![Message::user("hi")])
            .await
            .unwrap();

        let request = || {
            Request::builder()
                .method("DELETE")
                .uri("/threads/gone")
                .body(Body::empty())
                .unwrap()
        };
        let response = v1_router(state.clone()).oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: DeleteThreadResponse = body_json(response).await;
        assert!(json.cleared);

        let response = v1_router(state.clone()).oneshot(request()).await.unwrap();
        let json: DeleteThreadResponse = body_json(response).await;
        assert!(!json.cleared);
        assert!(state.history.load(&ThreadId::from("gone")).await.unwrap().is_empty());
    }
}
