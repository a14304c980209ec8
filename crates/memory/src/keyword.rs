//! In-memory keyword retriever.
//!
//! Scores each passage by how often the query's terms occur in it,
//! normalised by passage length so long passages don't win by size alone.

use crate::corpus::Corpus;
use async_trait::async_trait;
use loresmith_core::error::RetrievalError;
use loresmith_core::retrieval::{Passage, Retriever};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Words too common to carry any signal in a question.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "did", "do", "does", "for", "from", "how",
    "in", "is", "it", "its", "of", "on", "or", "that", "the", "this", "to", "was", "were", "what",
    "when", "where", "which", "who", "why", "with",
];

/// A keyword-scored retriever over passages held in memory.
pub struct KeywordRetriever {
    passages: Arc<RwLock<Vec<Passage>>>,
}

impl KeywordRetriever {
    pub fn new() -> Self {
        Self {
            passages: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn from_corpus(corpus: Corpus) -> Self {
        Self {
            passages: Arc::new(RwLock::new(corpus.into_passages())),
        }
    }

    /// Add a passage to the index.
    pub async fn add(&self, passage: Passage) {
        self.passages.write().await.push(passage);
    }
}

impl Default for KeywordRetriever {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercased query terms, stopwords and one-letter tokens removed.
fn terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|t| t.chars().count() > 1 && !STOPWORDS.contains(&t.as_str()))
        .collect();
    terms.sort_unstable();
    terms.dedup();
    terms
}

fn score(text: &str, terms: &[String]) -> f32 {
    let lower = text.to_lowercase();
    let occurrences: usize = terms.iter().map(|t| lower.matches(t.as_str()).count()).sum();
    // Each distinct matching term adds a bonus so broad coverage beats repetition.
    let coverage = terms.iter().filter(|t| lower.contains(t.as_str())).count();
    (occurrences + coverage) as f32 / (text.len() as f32 / 100.0).max(1.0)
}

#[async_trait]
impl Retriever for KeywordRetriever {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Passage>, RetrievalError> {
        let terms = terms(query);
        if terms.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let passages = self.passages.read().await;
        let mut results: Vec<Passage> = passages
            .iter()
            .filter_map(|p| {
                let s = score(&p.text, &terms);
                (s > 0.0).then(|| Passage {
                    score: s,
                    ..p.clone()
                })
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);

        Ok(results)
    }

    async fn len(&self) -> Result<usize, RetrievalError> {
        Ok(self.passages.read().await.len())
    }
}
