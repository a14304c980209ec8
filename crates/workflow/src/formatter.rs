//! Response formatter: renders the final answer through a persona.
//!
//! Always runs on the caller's backend, never on a routed tier. Every failure
//! degrades to the combined answer, and to a fixed apology when even that is
//! empty. Nothing is raised.

use crate::observer::{TurnObserver, TurnSummary};
use crate::parser::normalize_content;
use crate::prompts::APOLOGY;
use crate::state::{Complexity, SubQuery, merge_sources};
use loresmith_core::error::WorkflowError;
use loresmith_core::message::Message;
use loresmith_core::persona::PromptTemplate;
use loresmith_core::provider::Backend;
use loresmith_providers::WorkflowStep;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Buffer between the provider stream and the caller.
const CHUNK_BUFFER: usize = 64;

/// Assemble the context block handed to the persona.
///
/// Holds the combined answer, each question/answer/sources triple for a
/// composite turn, and a closing `Sources:` line when there are any.
pub fn build_context(complexity: Complexity, subqueries: &[SubQuery], combined_answer: &str) -> String {
    let mut context = combined_answer.trim().to_string();

    if complexity == Complexity::Composite {
        for sq in subqueries {
            context.push_str(&format!("\n\nQuestion: {}\nAnswer: {}", sq.text, sq.result));
            if !sq.sources.is_empty() {
                context.push_str(&format!("\nSources: {}", sq.sources.join(", ")));
            }
        }
    }

    let sources = merge_sources(subqueries);
    if !sources.is_empty() {
        context.push_str(&format!("\n\nSources: {}", sources.join(", ")));
    }
    context
}

/// What the caller sees when the persona call produced nothing usable.
fn fallback_text(combined_answer: &str) -> String {
    if combined_answer.trim().is_empty() {
        APOLOGY.to_string()
    } else {
        combined_answer.to_string()
    }
}

pub struct ResponseFormatter {
    backend: Backend,
}

/// One formatting request.
pub struct FormatInput<'a> {
    pub query: &'a str,
    pub complexity: Complexity,
    pub subqueries: &'a [SubQuery],
    pub combined_answer: &'a str,
    pub history: &'a [Message],
    pub template: &'a dyn PromptTemplate,
}

impl FormatInput<'_> {
    fn messages(&self) -> Vec<Message> {
        let context = build_context(self.complexity, self.subqueries, self.combined_answer);
        self.template.format_messages(self.history, &context, self.query)
    }
}

impl ResponseFormatter {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    /// Complete mode: the rendered text, or the combined answer on failure.
    pub async fn format(&self, input: FormatInput<'_>, observer: &TurnObserver) -> String {
        let started = Instant::now();
        let rendered = self
            .backend
            .invoke(input.messages())
            .await
            .map_err(WorkflowError::from)
            .map(|raw| normalize_content(&raw).trim().to_string());

        let (text, fallback) = match rendered {
            Ok(text) if !text.is_empty() => (text, false),
            Ok(_) => {
                warn!("Response step returned nothing, using combined answer");
                (fallback_text(input.combined_answer), true)
            }
            Err(e) => {
                observer.error("response", &e);
                (fallback_text(input.combined_answer), true)
            }
        };

        observer.step_on(WorkflowStep::Response, &self.backend, fallback, started);
        text
    }

    /// Stream mode. Chunks arrive on the returned receiver; the turn summary
    /// is published once the stream ends.
    pub async fn format_stream(
        &self,
        input: FormatInput<'_>,
        observer: TurnObserver,
        summary: TurnSummary,
    ) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(CHUNK_BUFFER);
        let fallback = fallback_text(input.combined_answer);
        let backend = self.backend.clone();
        let started = Instant::now();

        let upstream = match backend.stream(input.messages()).await {
            Ok(upstream) => upstream,
            Err(e) => {
                observer.error("response", &WorkflowError::from(e));
                // Capacity is fresh, so this cannot fail for lack of room.
                let _ = tx.try_send(fallback);
                observer.step_on(WorkflowStep::Response, &backend, true, started);
                observer.turn_completed(&summary);
                return rx;
            }
        };

        tokio::spawn(async move {
            let mut upstream = upstream;
            let mut sent = 0usize;
            let mut used_fallback = false;

            while let Some(item) = upstream.recv().await {
                match item {
                    Ok(chunk) => {
                        if let Some(content) = chunk.content.filter(|c| !c.is_empty()) {
                            if tx.send(content).await.is_err() {
                                debug!("Stream receiver dropped");
                                break;
                            }
                            sent += 1;
                        }
                        if chunk.done {
                            break;
                        }
                    }
                    Err(e) => {
                        let error = WorkflowError::from(e);
                        if sent == 0 {
                            observer.error("response", &error);
                            let _ = tx.send(fallback.clone()).await;
                            used_fallback = true;
                        } else {
                            warn!(
                                thread_id = %observer.thread_id(),
                                chunks = sent,
                                error = %error,
                                "Response stream broke, keeping partial answer"
                            );
                        }
                        break;
                    }
                }
            }

            if sent == 0 && !used_fallback && !tx.is_closed() {
                warn!("Response stream ended without content, using combined answer");
                let _ = tx.send(fallback).await;
                used_fallback = true;
            }

            observer.step_on(WorkflowStep::Response, &backend, used_fallback, started);
            observer.turn_completed(&summary);
        });

        rx
    }
}
