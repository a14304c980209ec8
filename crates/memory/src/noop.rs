//! No-op retriever: answers every query with an empty passage list.

use async_trait::async_trait;
use loresmith_core::error::RetrievalError;
use loresmith_core::retrieval::{Passage, Retriever};

/// A retriever with nothing behind it. Every subquery takes the
/// "no relevant information" path.
pub struct NoopRetriever;

#[async_trait]
impl Retriever for NoopRetriever {
    fn name(&self) -> &str {
        "none"
    }

    async fn search(&self, _query: &str, _top_k: usize) -> Result<Vec<Passage>, RetrievalError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_empty() {
        let retriever = NoopRetriever;
        assert!(retriever.search("anything", 4).await.unwrap().is_empty());
        assert_eq!(retriever.len().await.unwrap(), 0);
    }
}
