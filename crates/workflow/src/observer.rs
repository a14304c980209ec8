//! Per-turn event emission.
//!
//! Every event goes to the `EventBus` (when one is attached) and to a
//! `tracing` record, so a turn can be followed from logs alone.

use crate::state::{Complexity, SubQuery, SubQueryStatus};
use chrono::Utc;
use loresmith_core::error::WorkflowError;
use loresmith_core::event::{DomainEvent, EventBus};
use loresmith_core::provider::Backend;
use loresmith_providers::WorkflowStep;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Cloned into every resolver task; cheap.
#[derive(Clone)]
pub struct TurnObserver {
    bus: Option<Arc<EventBus>>,
    thread_id: String,
}

/// Totals published when a turn finishes.
#[derive(Debug, Clone)]
pub struct TurnSummary {
    pub complexity: Complexity,
    pub subqueries: usize,
    pub failed: usize,
    pub started: Instant,
}

impl TurnObserver {
    pub fn new(bus: Option<Arc<EventBus>>, thread_id: impl Into<String>) -> Self {
        Self {
            bus,
            thread_id: thread_id.into(),
        }
    }

    /// An observer that only logs.
    pub fn detached() -> Self {
        Self::new(None, "default")
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(event);
        }
    }

    pub fn turn_started(&self, query: &str) {
        let query_preview: String = query.chars().take(80).collect();
        info!(thread_id = %self.thread_id, query = %query_preview, "Turn started");
        self.publish(DomainEvent::TurnStarted {
            thread_id: self.thread_id.clone(),
            query_preview,
            timestamp: Utc::now(),
        });
    }

    pub fn step_completed(&self, step: WorkflowStep, backend: &str, fallback: bool, elapsed: Duration) {
        let duration_ms = elapsed.as_millis() as u64;
        debug!(
            thread_id = %self.thread_id,
            step = %step,
            backend = %backend,
            fallback,
            duration_ms,
            "Step completed"
        );
        self.publish(DomainEvent::StepCompleted {
            thread_id: self.thread_id.clone(),
            step: step.to_string(),
            backend: backend.to_string(),
            fallback,
            duration_ms,
            timestamp: Utc::now(),
        });
    }

    /// Convenience for steps that ran on a routed backend.
    pub fn step_on(&self, step: WorkflowStep, backend: &Backend, fallback: bool, started: Instant) {
        self.step_completed(step, &backend.label(), fallback, started.elapsed());
    }

    pub fn transition(&self, subquery: &SubQuery, from: SubQueryStatus) {
        let to = subquery.status();
        debug!(
            thread_id = %self.thread_id,
            subquery = %subquery.id,
            index = subquery.index,
            from = %from,
            to = %to,
            "Subquery transition"
        );
        self.publish(DomainEvent::SubQueryTransition {
            thread_id: self.thread_id.clone(),
            subquery_id: subquery.id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn error(&self, context: &str, error: &WorkflowError) {
        warn!(
            thread_id = %self.thread_id,
            context,
            kind = error.kind(),
            error = %error,
            "Workflow error recovered"
        );
        self.publish(DomainEvent::ErrorOccurred {
            thread_id: self.thread_id.clone(),
            context: context.to_string(),
            kind: error.kind().to_string(),
            error_message: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn turn_completed(&self, summary: &TurnSummary) {
        let duration_ms = summary.started.elapsed().as_millis() as u64;
        info!(
            thread_id = %self.thread_id,
            complexity = %summary.complexity,
            subqueries = summary.subqueries,
            failed = summary.failed,
            duration_ms,
            "Turn completed"
        );
        self.publish(DomainEvent::TurnCompleted {
            thread_id: self.thread_id.clone(),
            complexity: summary.complexity.to_string(),
            subqueries: summary.subqueries,
            failed: summary.failed,
            duration_ms,
            timestamp: Utc::now(),
        });
    }
}
