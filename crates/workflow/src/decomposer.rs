//! Decomposer: decides whether a question needs splitting.
//!
//! One routed call classifies the question and, when it is composite,
//! proposes subqueries. The decomposer never fails: any call or parse error
//! degrades to an atomic turn over the original question.

use crate::observer::TurnObserver;
use crate::parser::parse_json;
use crate::prompts;
use crate::state::{Complexity, SubQuery};
use loresmith_core::error::WorkflowError;
use loresmith_core::message::Message;
use loresmith_core::provider::Backend;
use loresmith_providers::WorkflowStep;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct DecompositionReply {
    #[serde(default)]
    query_type: String,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    subqueries: Vec<serde_json::Value>,
}

/// The decomposer's verdict.
#[derive(Debug)]
pub struct Decomposition {
    pub complexity: Complexity,
    pub subqueries: Vec<SubQuery>,
    pub reasoning: Option<String>,
    /// The call or its parse failed and the turn was forced atomic.
    pub fallback: bool,
}

impl Decomposition {
    fn atomic(query: &str, reasoning: Option<String>, fallback: bool) -> Self {
        Self {
            complexity: Complexity::Atomic,
            subqueries: vec![SubQuery::new(0, query)],
            reasoning,
            fallback,
        }
    }
}

pub struct Decomposer {
    backend: Backend,
    max_subqueries: usize,
}

impl Decomposer {
    pub fn new(backend: Backend, max_subqueries: usize) -> Self {
        Self {
            backend,
            max_subqueries: max_subqueries.max(1),
        }
    }

    pub async fn decompose(&self, query: &str, observer: &TurnObserver) -> Decomposition {
        let started = Instant::now();
        let outcome = self.classify(query).await;

        let decomposition = match outcome {
            Ok(reply) => self.build(query, reply),
            Err(e) => {
                observer.error("decomposition", &e);
                Decomposition::atomic(query, None, true)
            }
        };

        observer.step_on(
            WorkflowStep::Decomposition,
            &self.backend,
            decomposition.fallback,
            started,
        );
        info!(
            complexity = %decomposition.complexity,
            subqueries = decomposition.subqueries.len(),
            "Query decomposed"
        );
        decomposition
    }

    async fn classify(&self, query: &str) -> Result<DecompositionReply, WorkflowError> {
        let raw = self
            .backend
            .invoke(vec![Message::user(prompts::decomposition(
                query,
                self.max_subqueries,
            ))])
            .await?;
        parse_json(&raw)
    }

    fn build(&self, query: &str, reply: DecompositionReply) -> Decomposition {
        let reasoning = Some(reply.reasoning).filter(|r| !r.trim().is_empty());

        if !reply.query_type.trim().eq_ignore_ascii_case("complex") {
            return Decomposition::atomic(query, reasoning, false);
        }

        let mut texts: Vec<String> = Vec::new();
        for text in reply
            .subqueries
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            if !texts.iter().any(|seen| seen.eq_ignore_ascii_case(text)) {
                texts.push(text.to_string());
            }
        }

        if texts.len() > self.max_subqueries {
            warn!(
                proposed = texts.len(),
                cap = self.max_subqueries,
                "Too many subqueries, truncating"
            );
            texts.truncate(self.max_subqueries);
        }

        if texts.len() <= 1 {
            // A "complex" verdict with a single usable piece is just the question.
            return Decomposition::atomic(query, reasoning, false);
        }

        Decomposition {
            complexity: Complexity::Composite,
            subqueries: texts
                .into_iter()
                .enumerate()
                .map(|(i, text)| SubQuery::new(i, text))
                .collect(),
            reasoning,
            fallback: false,
        }
    }
}
