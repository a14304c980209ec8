//! Subquery resolver: retrieve → evaluate → refine → answer, per subquery.
//!
//! A resolver is cloned into each fan-out task and owns the subquery it is
//! given. Any error ends resolution and is recorded on the subquery; nothing
//! is propagated. An insufficient verdict is a value that triggers the single
//! refinement, never an error.

use crate::observer::TurnObserver;
use crate::parser::{normalize_content, parse_json};
use crate::prompts;
use crate::state::{Evaluation, SubQuery, SubQueryStatus};
use loresmith_core::error::WorkflowError;
use loresmith_core::message::Message;
use loresmith_core::retrieval::{Passage, Retriever};
use loresmith_providers::{BackendRouter, WorkflowStep};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error};

#[derive(Clone)]
pub struct Resolver {
    retriever: Arc<dyn Retriever>,
    router: Arc<BackendRouter>,
    top_k: usize,
    observer: TurnObserver,
}

impl Resolver {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        router: Arc<BackendRouter>,
        top_k: usize,
        observer: TurnObserver,
    ) -> Self {
        Self {
            retriever,
            router,
            top_k,
            observer,
        }
    }

    pub fn observer(&self) -> &TurnObserver {
        &self.observer
    }

    /// Drive a pending subquery to a terminal state.
    pub async fn resolve(&self, mut subquery: SubQuery) -> SubQuery {
        self.advance(&mut subquery, |sq| sq.transition(SubQueryStatus::Processing));

        match self.run(&mut subquery).await {
            Ok(answer) => self.advance(&mut subquery, |sq| sq.complete(answer)),
            Err(e) => {
                self.observer.error("subquery", &e);
                self.advance(&mut subquery, |sq| sq.fail(e));
            }
        }
        subquery
    }

    /// Apply a status change and report it. An illegal change is logged and
    /// leaves the subquery untouched.
    fn advance<F, E>(&self, subquery: &mut SubQuery, change: F)
    where
        F: FnOnce(&mut SubQuery) -> Result<SubQueryStatus, E>,
        E: std::fmt::Display,
    {
        match change(subquery) {
            Ok(from) => self.observer.transition(subquery, from),
            Err(e) => error!(subquery = %subquery.id, error = %e, "Rejected subquery transition"),
        }
    }

    async fn run(&self, subquery: &mut SubQuery) -> Result<String, WorkflowError> {
        subquery.retrieved_passages = self.retrieve(&subquery.text).await?;

        let evaluation = self.evaluate(&subquery.text, &subquery.retrieved_passages).await?;
        let sufficient = evaluation.sufficient;
        let missing = evaluation.missing_information.clone();
        subquery.evaluation = Some(evaluation);

        // The refined retrieval goes straight to the answer step.
        if !sufficient && subquery.can_refine() {
            let rewritten = self
                .refine(&subquery.text, &subquery.retrieved_passages, &missing)
                .await?;
            subquery.apply_refinement(&rewritten);
            debug!(
                subquery = %subquery.id,
                original = %subquery.original_text,
                refined = %subquery.text,
                "Subquery refined"
            );
            subquery.retrieved_passages = self.retrieve(&subquery.text).await?;
        }

        self.answer(&subquery.text, &subquery.retrieved_passages).await
    }

    async fn retrieve(&self, query: &str) -> Result<Vec<Passage>, WorkflowError> {
        let passages = self.retriever.search(query, self.top_k).await?;
        debug!(
            retriever = self.retriever.name(),
            query = %query,
            passages = passages.len(),
            "Retrieved passages"
        );
        Ok(passages)
    }

    async fn evaluate(&self, query: &str, passages: &[Passage]) -> Result<Evaluation, WorkflowError> {
        if passages.is_empty() {
            return Ok(Evaluation::insufficient("No documents retrieved"));
        }

        let backend = self.router.backend_for(WorkflowStep::Evaluation);
        let started = Instant::now();
        let raw = backend
            .invoke(vec![Message::user(prompts::evaluation(query, passages))])
            .await?;
        self.observer.step_on(WorkflowStep::Evaluation, &backend, false, started);

        let evaluation: Evaluation = parse_json(&raw)?;
        debug!(
            sufficient = evaluation.sufficient,
            reasoning = %evaluation.reasoning,
            "Evaluated passages"
        );
        Ok(evaluation)
    }

    async fn refine(
        &self,
        query: &str,
        passages: &[Passage],
        missing_information: &str,
    ) -> Result<String, WorkflowError> {
        let backend = self.router.backend_for(WorkflowStep::Refinement);
        let started = Instant::now();
        let raw = backend
            .invoke(vec![Message::user(prompts::refinement(
                query,
                passages,
                missing_information,
            ))])
            .await?;
        self.observer.step_on(WorkflowStep::Refinement, &backend, false, started);

        Ok(clean_rewrite(&normalize_content(&raw)))
    }

    async fn answer(&self, query: &str, passages: &[Passage]) -> Result<String, WorkflowError> {
        // Nothing to ground an answer in, so no model call.
        if passages.is_empty() {
            return Ok(prompts::NO_INFORMATION_ANSWER.to_string());
        }

        let backend = self.router.backend_for(WorkflowStep::Answer);
        let started = Instant::now();
        let raw = backend
            .invoke(vec![Message::user(prompts::answer(query, passages))])
            .await?;
        self.observer.step_on(WorkflowStep::Answer, &backend, false, started);

        Ok(normalize_content(&raw).trim().to_string())
    }
}

/// Strip whitespace and surrounding quotes from a rewritten query.
fn clean_rewrite(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '“' | '”' | '`'))
        .trim()
        .to_string()
}
