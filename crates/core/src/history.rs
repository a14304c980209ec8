//! History store trait: conversation persistence keyed by thread id.
//!
//! The workflow never talks to a store directly. Callers restore the
//! history for a thread, hand it to the workflow, and append the new
//! exchange once the turn completes.

use crate::error::HistoryError;
use crate::message::{Message, ThreadId};
use async_trait::async_trait;

/// Implementations: in-memory, JSONL file per thread.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// The backend name (e.g., "memory", "file").
    fn name(&self) -> &str;

    /// All stored messages for a thread, oldest first. Unknown threads are empty.
    async fn load(&self, thread: &ThreadId) -> Result<Vec<Message>, HistoryError>;

    /// Append messages to a thread.
    async fn append(&self, thread: &ThreadId, messages: Vec<Message>) -> Result<(), HistoryError>;

    /// Drop a thread. Returns whether anything was removed.
    async fn clear(&self, thread: &ThreadId) -> Result<bool, HistoryError>;
}
