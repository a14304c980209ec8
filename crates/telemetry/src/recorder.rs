//! Event-driven turn recorder: folds `DomainEvent`s into `TurnTrace`s and
//! keeps the most recent ones for inspection.

use crate::TelemetryError;
use crate::model::*;
use loresmith_core::event::{DomainEvent, EventBus};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Completed traces retained by default.
pub const DEFAULT_CAPACITY: usize = 200;

/// Collects turn traces from the event bus.
///
/// Thread-safe via `RwLock`. Open traces are keyed by thread id; a trace
/// moves to the completed ring when its `TurnCompleted` arrives.
pub struct TurnRecorder {
    open: RwLock<HashMap<String, TurnTrace>>,
    completed: RwLock<VecDeque<TurnTrace>>,
    capacity: usize,
}

impl TurnRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            open: RwLock::new(HashMap::new()),
            completed: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to `bus` and record until it closes.
    pub fn spawn(self: &Arc<Self>, bus: &EventBus) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        let recorder = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => recorder.record(&event),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Turn recorder lagged, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Turn recorder stopped");
        })
    }

    /// Fold one event into the matching trace.
    pub fn record(&self, event: &DomainEvent) {
        match event {
            DomainEvent::TurnStarted {
                thread_id,
                query_preview,
                timestamp,
            } => {
                let trace = TurnTrace::new(thread_id.clone(), query_preview.clone(), *timestamp);
                let replaced = write(&self.open).insert(thread_id.clone(), trace);
                if let Some(previous) = replaced {
                    // Two turns on one thread at once; keep the older one as unfinished.
                    warn!(thread_id = %thread_id, trace = %previous.id, "Turn replaced before completion");
                    self.retain(previous);
                }
            }
            DomainEvent::StepCompleted {
                thread_id,
                step,
                backend,
                fallback,
                duration_ms,
                timestamp,
            } => self.with_open(thread_id, |trace| {
                trace.steps.push(StepSpan {
                    step: step.clone(),
                    backend: backend.clone(),
                    fallback: *fallback,
                    duration_ms: *duration_ms,
                    ended_at: *timestamp,
                });
            }),
            DomainEvent::SubQueryTransition {
                thread_id,
                subquery_id,
                from,
                to,
                timestamp,
            } => self.with_open(thread_id, |trace| {
                trace.transitions.push(TransitionRecord {
                    subquery_id: subquery_id.clone(),
                    from: from.clone(),
                    to: to.clone(),
                    at: *timestamp,
                });
            }),
            DomainEvent::ErrorOccurred {
                thread_id,
                context,
                kind,
                error_message,
                timestamp,
            } => self.with_open(thread_id, |trace| {
                trace.errors.push(ErrorRecord {
                    context: context.clone(),
                    kind: kind.clone(),
                    message: error_message.clone(),
                    at: *timestamp,
                });
            }),
            DomainEvent::TurnCompleted {
                thread_id,
                complexity,
                subqueries,
                failed,
                duration_ms,
                timestamp,
            } => {
                let Some(mut trace) = write(&self.open).remove(thread_id) else {
                    debug!(thread_id = %thread_id, "Completion for unknown turn ignored");
                    return;
                };
                trace.ended_at = Some(*timestamp);
                trace.complexity = Some(complexity.clone());
                trace.subquery_count = *subqueries;
                trace.failed_subqueries = *failed;
                trace.duration_ms = Some(*duration_ms);
                self.retain(trace);
            }
        }
    }

    fn with_open(&self, thread_id: &str, apply: impl FnOnce(&mut TurnTrace)) {
        match write(&self.open).get_mut(thread_id) {
            Some(trace) => apply(trace),
            None => debug!(thread_id = %thread_id, "Event for unknown turn ignored"),
        }
    }

    fn retain(&self, trace: TurnTrace) {
        let mut completed = write(&self.completed);
        while completed.len() >= self.capacity {
            completed.pop_front();
        }
        completed.push_back(trace);
    }

    // ── Queries ───────────────────────────────────────────────────────

    /// Most recent traces, newest first.
    pub fn recent(&self, limit: usize) -> Vec<TurnTrace> {
        read(&self.completed).iter().rev().take(limit).cloned().collect()
    }

    pub fn trace(&self, id: &str) -> Result<TurnTrace, TelemetryError> {
        read(&self.completed)
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| TelemetryError::UnknownTrace(id.to_string()))
    }

    /// Retained traces of one thread, oldest first.
    pub fn for_thread(&self, thread_id: &str) -> Vec<TurnTrace> {
        read(&self.completed)
            .iter()
            .filter(|t| t.thread_id == thread_id)
            .cloned()
            .collect()
    }

    pub fn in_flight(&self) -> usize {
        read(&self.open).len()
    }

    pub fn len(&self) -> usize {
        read(&self.completed).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop traces of a cleared thread.
    pub fn forget_thread(&self, thread_id: &str) -> usize {
        let mut completed = write(&self.completed);
        let before = completed.len();
        completed.retain(|t| t.thread_id != thread_id);
        before - completed.len()
    }

    pub fn usage_snapshot(&self) -> UsageSnapshot {
        let completed = read(&self.completed);
        let finished: Vec<&TurnTrace> = completed.iter().filter(|t| t.is_complete()).collect();
        let total_ms: u64 = finished.iter().filter_map(|t| t.duration_ms).sum();

        UsageSnapshot {
            turns: finished.len(),
            in_flight: self.in_flight(),
            composite_turns: finished
                .iter()
                .filter(|t| t.complexity.as_deref() == Some("composite"))
                .count(),
            subqueries: finished.iter().map(|t| t.subquery_count).sum(),
            failed_subqueries: finished.iter().map(|t| t.failed_subqueries).sum(),
            fallback_steps: completed.iter().map(TurnTrace::fallback_count).sum(),
            errors: completed.iter().map(|t| t.errors.len()).sum(),
            avg_duration_ms: if finished.is_empty() {
                0
            } else {
                total_ms / finished.len() as u64
            },
        }
    }

    /// Retained traces as pretty JSON.
    pub fn export_json(&self) -> Result<String, TelemetryError> {
        let traces: Vec<TurnTrace> = read(&self.completed).iter().cloned().collect();
        Ok(serde_json::to_string_pretty(&traces)?)
    }
}

impl Default for TurnRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// A panic while holding a lock leaves plain data behind; keep serving it.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
