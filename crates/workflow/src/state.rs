//! Turn and subquery state.
//!
//! A [`TurnState`] is built once per turn and owned by the workflow. Each
//! [`SubQuery`] is moved into exactly one resolver task and moved back out
//! when that task finishes, so none of this state is ever shared or locked.

use loresmith_core::error::WorkflowError;
use loresmith_core::message::{Message, ThreadId};
use loresmith_core::retrieval::{Passage, unique_sources};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Upper bound on query rewrites per subquery.
pub const MAX_REFINEMENTS: u8 = 1;

/// Whether the question was split into several subqueries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Atomic,
    Composite,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Atomic => "atomic",
            Self::Composite => "composite",
        }
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a subquery: `pending → processing → complete | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubQueryStatus {
    Pending,
    Processing,
    Complete,
    Failed,
}

impl SubQueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Forward-only. A pending subquery may fail without ever starting
    /// (its task panicked or never ran before the deadline).
    pub fn can_transition_to(&self, next: SubQueryStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Failed)
                | (Self::Processing, Self::Complete)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl std::fmt::Display for SubQueryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal subquery transition {from} -> {to}")]
pub struct TransitionError {
    pub from: SubQueryStatus,
    pub to: SubQueryStatus,
}

/// A sufficiency verdict on a retrieval set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    #[serde(deserialize_with = "lenient_bool")]
    pub sufficient: bool,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default, deserialize_with = "text_or_null")]
    pub missing_information: String,
}

impl Evaluation {
    pub fn insufficient(reasoning: impl Into<String>) -> Self {
        Self {
            sufficient: false,
            reasoning: reasoning.into(),
            missing_information: String::new(),
        }
    }
}

/// Accepts `true`, `"true"`, `"yes"` and friends; models are not always strict.
fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Ok(true),
            "false" | "no" => Ok(false),
            other => Err(serde::de::Error::custom(format!("not a boolean: {other}"))),
        },
    }
}

fn text_or_null<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// The identity of a subquery, captured before it is handed to a task.
#[derive(Debug, Clone)]
pub struct SubQuerySnapshot {
    pub id: Uuid,
    pub index: usize,
    pub text: String,
    pub original_text: String,
}

/// One independently resolvable piece of the user's question.
#[derive(Debug, Clone, Serialize)]
pub struct SubQuery {
    pub id: Uuid,
    pub index: usize,
    /// Current query text; replaced at most once by a refinement.
    pub text: String,
    /// Text as produced by the decomposer.
    pub original_text: String,
    status: SubQueryStatus,
    /// Latest retrieval set. Replaced on refinement, never appended to.
    pub retrieved_passages: Vec<Passage>,
    refinement_count: u8,
    pub evaluation: Option<Evaluation>,
    pub result: String,
    pub sources: Vec<String>,
    pub error: Option<WorkflowError>,
}

impl SubQuery {
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id: Uuid::new_v4(),
            index,
            original_text: text.clone(),
            text,
            status: SubQueryStatus::Pending,
            retrieved_passages: Vec::new(),
            refinement_count: 0,
            evaluation: None,
            result: String::new(),
            sources: Vec::new(),
            error: None,
        }
    }

    /// Rebuild a pending subquery from its snapshot. Used when a task's own
    /// copy was lost to a panic or an abort.
    pub fn from_snapshot(snapshot: SubQuerySnapshot) -> Self {
        Self {
            id: snapshot.id,
            index: snapshot.index,
            text: snapshot.text,
            original_text: snapshot.original_text,
            ..Self::new(snapshot.index, String::new())
        }
    }

    pub fn snapshot(&self) -> SubQuerySnapshot {
        SubQuerySnapshot {
            id: self.id,
            index: self.index,
            text: self.text.clone(),
            original_text: self.original_text.clone(),
        }
    }

    pub fn status(&self) -> SubQueryStatus {
        self.status
    }

    pub fn refinement_count(&self) -> u8 {
        self.refinement_count
    }

    pub fn can_refine(&self) -> bool {
        self.refinement_count < MAX_REFINEMENTS
    }

    pub fn was_refined(&self) -> bool {
        self.text != self.original_text
    }

    /// Move to `next`, returning the previous status.
    pub fn transition(&mut self, next: SubQueryStatus) -> Result<SubQueryStatus, TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        let previous = self.status;
        self.status = next;
        Ok(previous)
    }

    /// Record a rewrite. A blank rewrite keeps the current text but still
    /// spends the refinement. Returns `false` once the cap is reached.
    pub fn apply_refinement(&mut self, rewritten: &str) -> bool {
        if !self.can_refine() {
            return false;
        }
        self.refinement_count += 1;
        if !rewritten.is_empty() {
            self.text = rewritten.to_string();
        }
        true
    }

    /// Mark complete with the answer and the passages it was grounded in.
    pub fn complete(&mut self, result: String) -> Result<SubQueryStatus, TransitionError> {
        let previous = self.transition(SubQueryStatus::Complete)?;
        self.sources = unique_sources(&self.retrieved_passages);
        self.result = result;
        Ok(previous)
    }

    /// Mark failed, recording the error and a readable placeholder result.
    pub fn fail(&mut self, error: WorkflowError) -> Result<SubQueryStatus, TransitionError> {
        let previous = self.transition(SubQueryStatus::Failed)?;
        self.result = format!("Error processing subquery: {}", error.message());
        self.error = Some(error);
        Ok(previous)
    }
}

/// Union of the subqueries' sources, first-seen order.
pub fn merge_sources(subqueries: &[SubQuery]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for source in subqueries.iter().flat_map(|sq| sq.sources.iter()) {
        if !seen.contains(source) {
            seen.push(source.clone());
        }
    }
    seen
}

/// Everything the workflow knows about one turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnState {
    pub thread_id: ThreadId,
    pub original_query: String,
    /// Prior messages, already windowed. Read-only.
    pub conversation_history: Vec<Message>,
    pub complexity: Complexity,
    /// Decomposition order. Sets combination and formatting order only.
    pub subqueries: Vec<SubQuery>,
    pub combined_answer: Option<String>,
}

impl TurnState {
    pub fn new(thread_id: ThreadId, original_query: impl Into<String>, history: Vec<Message>) -> Self {
        Self {
            thread_id,
            original_query: original_query.into(),
            conversation_history: history,
            complexity: Complexity::Atomic,
            subqueries: Vec::new(),
            combined_answer: None,
        }
    }

    /// De-duplicated union of every subquery's sources, in subquery order.
    pub fn sources(&self) -> Vec<String> {
        merge_sources(&self.subqueries)
    }

    pub fn failed_count(&self) -> usize {
        self.subqueries
            .iter()
            .filter(|sq| sq.status() == SubQueryStatus::Failed)
            .count()
    }
}
