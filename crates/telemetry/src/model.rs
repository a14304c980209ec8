//! Data model for turn traces: step spans, subquery transitions, errors and
//! aggregated usage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Span ──────────────────────────────────────────────────────────────────

/// One finished workflow step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepSpan {
    /// Step name (`decomposition`, `evaluation`, ...).
    pub step: String,
    /// `provider/model` label of the backend that served it.
    pub backend: String,
    /// The step took its local recovery path.
    pub fallback: bool,
    pub duration_ms: u64,
    /// When the step finished.
    pub ended_at: DateTime<Utc>,
}

/// A subquery status change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransitionRecord {
    pub subquery_id: String,
    pub from: String,
    pub to: String,
    pub at: DateTime<Utc>,
}

/// A recovered error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorRecord {
    pub context: String,
    pub kind: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

// ── Trace ─────────────────────────────────────────────────────────────────

/// Everything observed about one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnTrace {
    /// Unique trace id.
    pub id: String,
    pub thread_id: String,
    /// First characters of the question.
    pub query_preview: String,
    pub started_at: DateTime<Utc>,
    /// Set when the turn completed.
    pub ended_at: Option<DateTime<Utc>>,
    /// `atomic` or `composite`, known at completion.
    pub complexity: Option<String>,
    pub subquery_count: usize,
    pub failed_subqueries: usize,
    /// Wall-clock duration reported by the workflow.
    pub duration_ms: Option<u64>,
    pub steps: Vec<StepSpan>,
    pub transitions: Vec<TransitionRecord>,
    pub errors: Vec<ErrorRecord>,
}

impl TurnTrace {
    /// Open a trace for a turn that just started.
    pub fn new(thread_id: impl Into<String>, query_preview: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            query_preview: query_preview.into(),
            started_at,
            ended_at: None,
            complexity: None,
            subquery_count: 0,
            failed_subqueries: 0,
            duration_ms: None,
            steps: Vec::new(),
            transitions: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Number of spans recorded for `step`.
    pub fn step_count(&self, step: &str) -> usize {
        self.steps.iter().filter(|s| s.step == step).count()
    }

    /// Spans that used their recovery path.
    pub fn fallback_count(&self) -> usize {
        self.steps.iter().filter(|s| s.fallback).count()
    }

    /// Sum of step durations. Concurrent steps overlap, so this can exceed
    /// the turn's wall-clock duration.
    pub fn step_time_ms(&self) -> u64 {
        self.steps.iter().map(|s| s.duration_ms).sum()
    }

    /// Transitions of one subquery, oldest first.
    pub fn transitions_of(&self, subquery_id: &str) -> Vec<&TransitionRecord> {
        self.transitions
            .iter()
            .filter(|t| t.subquery_id == subquery_id)
            .collect()
    }
}

// ── Aggregated views ──────────────────────────────────────────────────────

/// A point-in-time summary over the retained traces (for `/v1/traces`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageSnapshot {
    /// Completed turns retained.
    pub turns: usize,
    /// Turns still in flight.
    pub in_flight: usize,
    pub composite_turns: usize,
    pub subqueries: usize,
    pub failed_subqueries: usize,
    /// Step spans that used their recovery path.
    pub fallback_steps: usize,
    pub errors: usize,
    /// Mean turn duration over completed turns.
    pub avg_duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(step: &str, fallback: bool, duration_ms: u64) -> StepSpan {
        StepSpan {
            step: step.into(),
            backend: "mock/model".into(),
            fallback,
            duration_ms,
            ended_at: Utc::now(),
        }
    }

    #[test]
    fn trace_aggregation() {
        let mut trace = TurnTrace::new("thread-1", "What is the capital", Utc::now());
        assert!(!trace.is_complete());

        trace.steps.push(span("decomposition", false, 40));
        trace.steps.push(span("answer", false, 25));
        trace.steps.push(span("answer", false, 30));
        trace.steps.push(span("combination", true, 5));

        assert_eq!(trace.step_count("answer"), 2);
        assert_eq!(trace.step_count("refinement"), 0);
        assert_eq!(trace.fallback_count(), 1);
        assert_eq!(trace.step_time_ms(), 100);
    }

    #[test]
    fn transitions_filter_by_subquery() {
        let mut trace = TurnTrace::new("t", "q", Utc::now());
        for (id, from, to) in [("a", "pending", "processing"), ("b", "pending", "processing"), ("a", "processing", "complete")] {
            trace.transitions.push(TransitionRecord {
                subquery_id: id.into(),
                from: from.into(),
                to: to.into(),
                at: Utc::now(),
            });
        }

        let of_a = trace.transitions_of("a");
        assert_eq!(of_a.len(), 2);
        assert_eq!(of_a[1].to, "complete");
    }

    #[test]
    fn trace_ids_are_unique() {
        let a = TurnTrace::new("t", "q", Utc::now());
        let b = TurnTrace::new("t", "q", Utc::now());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn trace_serializes_nested_records() {
        let mut trace = TurnTrace::new("conv-42", "Lyria?", Utc::now());
        trace.steps.push(span("answer", false, 12));
        trace.errors.push(ErrorRecord {
            context: "combination".into(),
            kind: "backend_call_failed".into(),
            message: "reset".into(),
            at: Utc::now(),
        });

        let json = serde_json::to_value(&trace).unwrap();
        assert_eq!(json["thread_id"], "conv-42");
        assert_eq!(json["steps"][0]["step"], "answer");
        assert_eq!(json["errors"][0]["kind"], "backend_call_failed");
        assert!(json["ended_at"].is_null());
    }
}
