//! Combiner: merges subquery results into one answer.
//!
//! A single subquery passes through untouched. Several are merged by one
//! routed call; if that call fails or returns nothing the results are
//! concatenated instead. The combiner never fails.

use crate::observer::TurnObserver;
use crate::parser::normalize_content;
use crate::prompts;
use crate::state::SubQuery;
use loresmith_core::error::WorkflowError;
use loresmith_core::message::Message;
use loresmith_core::provider::Backend;
use loresmith_providers::WorkflowStep;
use tokio::time::Instant;
use tracing::{debug, info};

pub struct Combiner {
    backend: Backend,
}

impl Combiner {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    pub async fn combine(
        &self,
        original_query: &str,
        subqueries: &[SubQuery],
        observer: &TurnObserver,
    ) -> String {
        match subqueries {
            [] => prompts::NO_SUBQUERIES_ANSWER.to_string(),
            [only] => {
                debug!("Single subquery, passing result through");
                if only.result.trim().is_empty() {
                    prompts::EMPTY_SINGLE_ANSWER.to_string()
                } else {
                    only.result.clone()
                }
            }
            many => self.merge(original_query, many, observer).await,
        }
    }

    async fn merge(&self, original_query: &str, subqueries: &[SubQuery], observer: &TurnObserver) -> String {
        let started = Instant::now();
        let merged = self
            .backend
            .invoke(vec![Message::user(prompts::combination(
                original_query,
                subqueries,
            ))])
            .await
            .map_err(WorkflowError::from)
            .and_then(|raw| {
                let text = normalize_content(&raw).trim().to_string();
                if text.is_empty() {
                    Err(WorkflowError::BackendCallFailed("empty combination".into()))
                } else {
                    Ok(text)
                }
            });

        let (answer, fallback) = match merged {
            Ok(text) => (text, false),
            Err(e) => {
                observer.error("combination", &e);
                (prompts::combination_fallback(subqueries), true)
            }
        };

        observer.step_on(WorkflowStep::Combination, &self.backend, fallback, started);
        info!(subqueries = subqueries.len(), fallback, "Subquery results combined");
        answer
    }
}
