//! HTTP API gateway for Loresmith.
//!
//! Exposes a health check and the v1 API (chat, streaming chat, routes,
//! traces, thread deletion) over one shared `AgenticWorkflow`.
//!
//! Built on Axum.

pub mod api_v1;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    http::{HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::Json,
    routing::get,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use loresmith_config::AppConfig;
use loresmith_core::event::EventBus;
use loresmith_core::persona::Persona;
use loresmith_providers::{BackendRouter, build_user_backend};
use loresmith_telemetry::TurnRecorder;
use loresmith_workflow::{AgenticWorkflow, WorkflowSettings};

/// Requests allowed per client per window.
const RATE_LIMIT: usize = 60;
const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Build the full router: `/health` plus the v1 API under `/v1`.
///
/// Layers applied:
/// - CORS for the local development origin
/// - Request body size limit (1 MB)
/// - In-memory rate limiting (60 req/min per client)
/// - HTTP trace logging
pub fn build_router(api_state: api_v1::SharedApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("http://localhost:8080"))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    let rate_limiter = Arc::new(RateLimiter::new(RATE_LIMIT, RATE_WINDOW));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", api_v1::v1_router(api_state))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(axum::middleware::from_fn(move |req, next| {
            let limiter = rate_limiter.clone();
            rate_limit_middleware(limiter, req, next)
        }))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Assemble the workflow and its collaborators from configuration.
pub fn build_state(config: &AppConfig) -> Result<api_v1::SharedApiState, Box<dyn std::error::Error>> {
    let user = build_user_backend(config, None, None)?;
    let router = Arc::new(BackendRouter::from_config(config, user));
    let retriever = loresmith_memory::build_retriever(config)?;
    let history = loresmith_memory::build_history(config);

    let event_bus = Arc::new(EventBus::default());
    let recorder = Arc::new(TurnRecorder::default());
    recorder.spawn(&event_bus);

    let workflow = AgenticWorkflow::new(router, retriever)
        .with_settings(WorkflowSettings::from_config(config))
        .with_persona(Persona::builtin(config.persona.kind()?))
        .with_event_bus(event_bus);

    Ok(Arc::new(api_v1::ApiV1State {
        workflow,
        history,
        recorder,
        start_time: chrono::Utc::now(),
    }))
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = build_state(&config)?;
    info!(
        retriever = state.workflow.retriever_name(),
        history = state.history.name(),
        persona = %state.workflow.persona().kind,
        "Workflow ready"
    );

    let app = build_router(state);

    info!(addr = %addr, "Gateway starting with v1 API");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Rate Limiter ---

/// Simple in-memory sliding-window rate limiter.
///
/// Tracks request timestamps per client key. Thread-safe via
/// `std::sync::Mutex` (non-async, held briefly).
struct RateLimiter {
    max_requests: usize,
    window: Duration,
    clients: std::sync::Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            clients: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if the client is within its allowance.
    fn check(&self, client_key: &str) -> bool {
        let now = Instant::now();
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());

        if clients.len() > 10_000 {
            clients.retain(|_, timestamps| {
                timestamps
                    .last()
                    .is_some_and(|t| now.duration_since(*t) < self.window)
            });
        }

        let timestamps = clients.entry(client_key.to_string()).or_default();
        timestamps.retain(|t| now.duration_since(*t) < self.window);

        if timestamps.len() >= self.max_requests {
            return false;
        }

        timestamps.push(now);
        true
    }
}

/// Keys clients by `X-Forwarded-For`, falling back to "anonymous".
/// `/health` is exempt.
async fn rate_limit_middleware(
    limiter: Arc<RateLimiter>,
    req: axum::extract::Request,
    next: Next,
) -> Result<axum::response::Response, StatusCode> {
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let client_key = req
        .headers()
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "anonymous".to_string());

    if !limiter.check(&client_key) {
        warn!(client = %client_key.chars().take(40).collect::<String>(), "Rate limit exceeded");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    Ok(next.run(req).await)
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn offline_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.default_provider = "ollama".into();
        config.routing.steps.clear();
        config.retrieval.backend = "none".into();
        config
    }

    #[tokio::test]
    async fn health_endpoint() {
        let state = build_state(&offline_config()).unwrap();
        let app = build_router(state);

        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn v1_is_nested() {
        let state = build_state(&offline_config()).unwrap();
        let app = build_router(state);

        let req = Request::builder().uri("/v1/routes").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn build_state_rejects_missing_corpus() {
        let mut config = offline_config();
        config.retrieval.backend = "keyword".into();
        config.retrieval.corpus_path = Some("/no/such/corpus.jsonl".into());
        assert!(build_state(&config).is_err());
    }

    #[test]
    fn rate_limiter_blocks_after_limit() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.check("client"));
        assert!(limiter.check("client"));
        assert!(!limiter.check("client"));
        assert!(limiter.check("other"));
    }
}
