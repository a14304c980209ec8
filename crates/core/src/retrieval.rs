//! Retriever trait: ranked passage lookup over a fixed corpus.
//!
//! Retrieval backends return passages ordered by relevance. An empty result
//! is a normal answer ("nothing matched"), never an error.

use crate::error::RetrievalError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single retrieved passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// The passage text
    pub text: String,

    /// Source identifier or locator (file path, URL, document id)
    pub source_id: String,

    /// Relevance score assigned by the backend (higher is better)
    #[serde(default)]
    pub score: f32,
}

impl Passage {
    pub fn new(text: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_id: source_id.into(),
            score: 0.0,
        }
    }
}

/// The core Retriever trait.
///
/// Implementations: in-memory keyword corpus, none (no-op).
#[async_trait]
pub trait Retriever: Send + Sync {
    /// The backend name (e.g., "keyword", "none").
    fn name(&self) -> &str;

    /// Return at most `top_k` passages for `query`, best first.
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Passage>, RetrievalError>;

    /// Number of passages the backend can search over, when known.
    async fn len(&self) -> Result<usize, RetrievalError> {
        Ok(0)
    }
}

/// De-duplicated source ids of `passages`, in first-seen order.
pub fn unique_sources<'a>(passages: impl IntoIterator<Item = &'a Passage>) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for passage in passages {
        if passage.source_id.is_empty() {
            continue;
        }
        if !sources.iter().any(|s| s == &passage.source_id) {
            sources.push(passage.source_id.clone());
        }
    }
    sources
}
