//! In-memory history store: threads live for the life of the process.

use async_trait::async_trait;
use loresmith_core::error::HistoryError;
use loresmith_core::history::HistoryStore;
use loresmith_core::message::{Message, ThreadId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Conversation history keyed by thread id, held in a map.
#[derive(Default, Clone)]
pub struct InMemoryHistory {
    threads: Arc<RwLock<HashMap<ThreadId, Vec<Message>>>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of threads with at least one message.
    pub async fn thread_count(&self) -> usize {
        self.threads.read().await.len()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load(&self, thread: &ThreadId) -> Result<Vec<Message>, HistoryError> {
        Ok(self.threads.read().await.get(thread).cloned().unwrap_or_default())
    }

    async fn append(&self, thread: &ThreadId, messages: Vec<Message>) -> Result<(), HistoryError> {
        if messages.is_empty() {
            return Ok(());
        }
        self.threads
            .write()
            .await
            .entry(thread.clone())
            .or_default()
            .extend(messages);
        Ok(())
    }

    async fn clear(&self, thread: &ThreadId) -> Result<bool, HistoryError> {
        Ok(self.threads.write().await.remove(thread).is_some())
    }
}
