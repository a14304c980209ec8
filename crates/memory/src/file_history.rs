//! File-backed history store: one JSON-lines file per thread.
//!
//! Storage location: `~/.loresmith/history/<thread>.jsonl` by default.
//! Each line is a JSON-encoded `Message`. Appends only write the new lines;
//! unreadable lines are skipped on load.

use async_trait::async_trait;
use loresmith_core::error::HistoryError;
use loresmith_core::history::HistoryStore;
use loresmith_core::message::{Message, ThreadId};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// A history store writing each thread to its own JSONL file.
pub struct FileHistory {
    dir: PathBuf,
    // Serialises writers so concurrent appends to one file don't interleave.
    write_lock: Mutex<()>,
}

impl FileHistory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        debug!(dir = %dir.display(), "File history store ready");
        Self {
            dir,
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a thread's file. Thread ids are restricted to a safe charset.
    fn thread_path(&self, thread: &ThreadId) -> Result<PathBuf, HistoryError> {
        let id = thread.as_str();
        let valid = !id.is_empty()
            && id.len() <= 128
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !id.starts_with('.');
        if !valid {
            return Err(HistoryError::InvalidThread(id.to_string()));
        }
        Ok(self.dir.join(format!("{id}.jsonl")))
    }
}

fn parse_lines(content: &str) -> Vec<Message> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<Message>(line) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(error = %e, "Skipping corrupted history line");
                None
            }
        })
        .collect()
}

#[async_trait]
impl HistoryStore for FileHistory {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self, thread: &ThreadId) -> Result<Vec<Message>, HistoryError> {
        let path = self.thread_path(thread)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(parse_lines(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(HistoryError::Storage(format!(
                "Failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    async fn append(&self, thread: &ThreadId, messages: Vec<Message>) -> Result<(), HistoryError> {
        if messages.is_empty() {
            return Ok(());
        }
        let path = self.thread_path(thread)?;

        let mut content = String::new();
        for message in &messages {
            let line = serde_json::to_string(message).map_err(|e| {
                HistoryError::Storage(format!("Failed to serialize message: {e}"))
            })?;
            content.push_str(&line);
            content.push('\n');
        }

        let _guard = self.write_lock.lock().await;
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            HistoryError::Storage(format!("Failed to create history directory: {e}"))
        })?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| HistoryError::Storage(format!("Failed to open {}: {e}", path.display())))?;
        file.write_all(content.as_bytes())
            .map_err(|e| HistoryError::Storage(format!("Failed to write history: {e}")))?;

        debug!(thread = %thread, appended = messages.len(), "History appended");
        Ok(())
    }

    async fn clear(&self, thread: &ThreadId) -> Result<bool, HistoryError> {
        let path = self.thread_path(thread)?;
        let _guard = self.write_lock.lock().await;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(HistoryError::Storage(format!("Failed to remove history: {e}"))),
        }
    }
}
