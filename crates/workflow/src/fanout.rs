//! Fan-out coordinator: resolves every subquery of a turn concurrently.
//!
//! One Tokio task per subquery, each owning its subquery by value. Handles
//! are joined in input order, so the output order never depends on which
//! task finished first. A task that panics, or is still running at the turn
//! deadline, is replaced by a failed subquery rebuilt from a snapshot taken
//! before spawn. A task that had started fails from `processing`, so the
//! published transitions stay forward-only.

use crate::resolver::Resolver;
use crate::state::{SubQuery, SubQuerySnapshot, SubQueryStatus};
use futures::future::join_all;
use loresmith_core::error::WorkflowError;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Why a task produced no subquery.
enum Lost {
    TimedOut,
    Panicked,
    Cancelled,
}

impl Lost {
    fn reason(&self) -> &'static str {
        match self {
            Self::TimedOut => "timed out",
            Self::Panicked => "task panicked",
            Self::Cancelled => "task cancelled",
        }
    }
}

impl From<JoinError> for Lost {
    fn from(e: JoinError) -> Self {
        if e.is_panic() {
            Self::Panicked
        } else {
            Self::Cancelled
        }
    }
}

/// Resolve all subqueries; every returned subquery is terminal.
pub async fn resolve_all(
    resolver: &Resolver,
    subqueries: Vec<SubQuery>,
    deadline: Option<Instant>,
) -> Vec<SubQuery> {
    let count = subqueries.len();
    let mut snapshots: Vec<(SubQuerySnapshot, Arc<AtomicBool>)> = Vec::with_capacity(count);
    let mut handles: Vec<JoinHandle<SubQuery>> = Vec::with_capacity(count);

    for subquery in subqueries {
        let started = Arc::new(AtomicBool::new(false));
        snapshots.push((subquery.snapshot(), started.clone()));
        let resolver = resolver.clone();
        // Set in the same poll that publishes pending -> processing.
        handles.push(tokio::spawn(async move {
            started.store(true, Ordering::SeqCst);
            resolver.resolve(subquery).await
        }));
    }
    debug!(tasks = count, "Subquery tasks spawned");

    let joined = join_all(handles.into_iter().map(|handle| join_by(handle, deadline))).await;

    joined
        .into_iter()
        .zip(snapshots)
        .map(|(outcome, (snapshot, started))| match outcome {
            Ok(subquery) => subquery,
            Err(lost) => replace_lost(resolver, snapshot, started.load(Ordering::SeqCst), lost),
        })
        .collect()
}

async fn join_by(mut handle: JoinHandle<SubQuery>, deadline: Option<Instant>) -> Result<SubQuery, Lost> {
    let Some(deadline) = deadline else {
        return handle.await.map_err(Lost::from);
    };
    match tokio::time::timeout_at(deadline, &mut handle).await {
        Ok(joined) => joined.map_err(Lost::from),
        Err(_) => {
            handle.abort();
            Err(Lost::TimedOut)
        }
    }
}

fn replace_lost(resolver: &Resolver, snapshot: SubQuerySnapshot, started: bool, lost: Lost) -> SubQuery {
    let observer = resolver.observer();
    let error = WorkflowError::BackendCallFailed(lost.reason().to_string());
    warn!(
        thread_id = %observer.thread_id(),
        subquery = %snapshot.id,
        index = snapshot.index,
        reason = lost.reason(),
        started,
        "Subquery task lost"
    );
    observer.error("fanout", &error);

    let mut subquery = SubQuery::from_snapshot(snapshot);
    // The task already reported entering processing.
    if started {
        let _ = subquery.transition(SubQueryStatus::Processing);
    }
    if let Ok(from) = subquery.fail(error) {
        observer.transition(&subquery, from);
    }
    subquery
}
