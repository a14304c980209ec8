//! The turn engine: wires decomposition, fan-out, combination and
//! formatting into one call.
//!
//! `AgenticWorkflow` holds only shared, immutable handles, so it is cheap to
//! clone and can serve concurrent turns. Every stage recovers locally; a turn
//! always yields an answer.

use crate::combiner::Combiner;
use crate::decomposer::Decomposer;
use crate::fanout::resolve_all;
use crate::formatter::{FormatInput, ResponseFormatter};
use crate::observer::{TurnObserver, TurnSummary};
use crate::resolver::Resolver;
use crate::state::TurnState;
use loresmith_config::AppConfig;
use loresmith_core::event::EventBus;
use loresmith_core::message::{Message, ThreadId};
use loresmith_core::persona::Persona;
use loresmith_core::provider::Backend;
use loresmith_core::retrieval::Retriever;
use loresmith_providers::{BackendRouter, WorkflowStep};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::info;

/// Per-turn limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowSettings {
    pub top_k: usize,
    pub max_subqueries: usize,
    /// Deadline for the fan-out stage, measured from turn start.
    pub turn_timeout: Option<Duration>,
    /// Most recent history messages handed to the formatter.
    pub max_history: usize,
}

impl WorkflowSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            max_subqueries: config.workflow.max_subqueries,
            turn_timeout: config.workflow.turn_timeout(),
            max_history: config.workflow.max_history,
        }
    }
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            top_k: 4,
            max_subqueries: 5,
            turn_timeout: Some(Duration::from_secs(120)),
            max_history: 10,
        }
    }
}

/// Result of a complete-mode turn.
#[derive(Debug)]
pub struct TurnOutcome {
    pub answer: String,
    pub state: TurnState,
}

/// Result of a stream-mode turn. `state` is final; only the rendering is
/// still in flight.
pub struct TurnStream {
    pub state: TurnState,
    pub chunks: mpsc::Receiver<String>,
}

#[derive(Clone)]
pub struct AgenticWorkflow {
    router: Arc<BackendRouter>,
    retriever: Arc<dyn Retriever>,
    persona: Persona,
    settings: WorkflowSettings,
    event_bus: Option<Arc<EventBus>>,
}

impl AgenticWorkflow {
    pub fn new(router: Arc<BackendRouter>, retriever: Arc<dyn Retriever>) -> Self {
        Self {
            router,
            retriever,
            persona: Persona::default(),
            settings: WorkflowSettings::default(),
            event_bus: None,
        }
    }

    pub fn with_settings(mut self, settings: WorkflowSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_persona(mut self, persona: Persona) -> Self {
        self.persona = persona;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Swap the caller's backend. Routed tiers are kept.
    pub fn with_user_backend(mut self, backend: Backend) -> Self {
        self.router = Arc::new(self.router.with_user_backend(backend));
        self
    }

    pub fn router(&self) -> &BackendRouter {
        &self.router
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    pub fn retriever_name(&self) -> &str {
        self.retriever.name()
    }

    /// Run a turn to completion and return the rendered answer.
    pub async fn process_turn(&self, query: &str, history: &[Message], thread_id: &ThreadId) -> TurnOutcome {
        let observer = self.observer(thread_id);
        let started = Instant::now();
        let state = self.resolve_turn(query, history, thread_id, &observer, started).await;

        let formatter = ResponseFormatter::new(self.router.user_backend().clone());
        let answer = formatter.format(format_input(&state, &self.persona), &observer).await;

        observer.turn_completed(&summary(&state, started));
        TurnOutcome { answer, state }
    }

    /// Run a turn up to formatting and stream the rendering.
    ///
    /// The turn-completed event is published once the stream ends.
    pub async fn process_turn_stream(
        &self,
        query: &str,
        history: &[Message],
        thread_id: &ThreadId,
    ) -> TurnStream {
        let observer = self.observer(thread_id);
        let started = Instant::now();
        let state = self.resolve_turn(query, history, thread_id, &observer, started).await;

        let formatter = ResponseFormatter::new(self.router.user_backend().clone());
        let chunks = formatter
            .format_stream(
                format_input(&state, &self.persona),
                observer,
                summary(&state, started),
            )
            .await;

        TurnStream { state, chunks }
    }

    fn observer(&self, thread_id: &ThreadId) -> TurnObserver {
        TurnObserver::new(self.event_bus.clone(), thread_id.as_str())
    }

    /// Decompose, resolve and combine. The returned state carries the
    /// combined answer.
    async fn resolve_turn(
        &self,
        query: &str,
        history: &[Message],
        thread_id: &ThreadId,
        observer: &TurnObserver,
        started: Instant,
    ) -> TurnState {
        let window = history.len().saturating_sub(self.settings.max_history);
        let mut state = TurnState::new(thread_id.clone(), query, history[window..].to_vec());
        observer.turn_started(query);

        let decomposer = Decomposer::new(
            self.router.backend_for(WorkflowStep::Decomposition),
            self.settings.max_subqueries,
        );
        let decomposition = decomposer.decompose(query, observer).await;
        state.complexity = decomposition.complexity;

        let resolver = Resolver::new(
            self.retriever.clone(),
            self.router.clone(),
            self.settings.top_k,
            observer.clone(),
        );
        let deadline = self.settings.turn_timeout.map(|timeout| started + timeout);
        state.subqueries = resolve_all(&resolver, decomposition.subqueries, deadline).await;

        let combiner = Combiner::new(self.router.backend_for(WorkflowStep::Combination));
        let combined = combiner.combine(query, &state.subqueries, observer).await;
        state.combined_answer = Some(combined);

        info!(
            thread_id = %thread_id,
            complexity = %state.complexity,
            subqueries = state.subqueries.len(),
            failed = state.failed_count(),
            "Turn resolved"
        );
        state
    }
}

fn format_input<'a>(state: &'a TurnState, persona: &'a Persona) -> FormatInput<'a> {
    FormatInput {
        query: &state.original_query,
        complexity: state.complexity,
        subqueries: &state.subqueries,
        combined_answer: state.combined_answer.as_deref().unwrap_or_default(),
        history: &state.conversation_history,
        template: persona,
    }
}

fn summary(state: &TurnState, started: Instant) -> TurnSummary {
    TurnSummary {
        complexity: state.complexity,
        subqueries: state.subqueries.len(),
        failed: state.failed_count(),
        started,
    }
}
