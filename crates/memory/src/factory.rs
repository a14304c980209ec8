//! Build retrieval and history backends from configuration.

use crate::{Corpus, FileHistory, InMemoryHistory, KeywordRetriever, NoopRetriever};
use loresmith_config::AppConfig;
use loresmith_core::error::RetrievalError;
use loresmith_core::history::HistoryStore;
use loresmith_core::retrieval::Retriever;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// The retriever named by `[retrieval]`, with its corpus loaded.
///
/// A keyword backend without `corpus_path` starts empty; every question
/// then takes the insufficient-information path.
pub fn build_retriever(config: &AppConfig) -> Result<Arc<dyn Retriever>, RetrievalError> {
    match config.retrieval.backend.as_str() {
        "none" => Ok(Arc::new(NoopRetriever)),
        "keyword" => {
            let Some(path) = config.retrieval.corpus_path.as_deref() else {
                warn!("No retrieval.corpus_path configured, keyword retriever is empty");
                return Ok(Arc::new(KeywordRetriever::new()));
            };
            let corpus = Corpus::load(Path::new(path), config.retrieval.chunk_size)?;
            Ok(Arc::new(KeywordRetriever::from_corpus(corpus)))
        }
        other => Err(RetrievalError::Unavailable(format!(
            "unknown retrieval backend '{other}'"
        ))),
    }
}

/// The history store named by `[history]`. Unknown kinds fall back to memory.
pub fn build_history(config: &AppConfig) -> Arc<dyn HistoryStore> {
    match config.history.backend.as_str() {
        "file" => Arc::new(FileHistory::new(config.history_dir())),
        "memory" => Arc::new(InMemoryHistory::new()),
        other => {
            warn!(backend = other, "Unknown history backend, using memory");
            Arc::new(InMemoryHistory::new())
        }
    }
}
