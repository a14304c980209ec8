//! Corpus loading: turns files on disk into retrievable passages.
//!
//! Accepted inputs:
//! - a `.json` file holding an array of `{ "text", "source" }` records
//! - a `.jsonl` file with one such record per line
//! - a directory of `.md` / `.txt` documents, chunked on paragraph boundaries

use loresmith_core::error::RetrievalError;
use loresmith_core::retrieval::Passage;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info, warn};

/// One record in a JSON / JSONL corpus file.
#[derive(Debug, Deserialize)]
struct CorpusRecord {
    text: String,
    /// Falls back to `url`, then to the file name.
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// An in-memory set of passages ready to be indexed.
#[derive(Debug, Default, Clone)]
pub struct Corpus {
    passages: Vec<Passage>,
}

impl Corpus {
    pub fn from_passages(passages: Vec<Passage>) -> Self {
        Self { passages }
    }

    /// Load a corpus from a file or directory.
    pub fn load(path: &Path, chunk_size: usize) -> Result<Self, RetrievalError> {
        let corpus = if path.is_dir() {
            Self::load_dir(path, chunk_size)?
        } else {
            match path.extension().and_then(|e| e.to_str()) {
                Some("jsonl") => Self::load_jsonl(path)?,
                Some("json") => Self::load_json(path)?,
                _ => Self::load_document(path, path, chunk_size)?,
            }
        };

        info!(path = %path.display(), passages = corpus.len(), "Corpus loaded");
        Ok(corpus)
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn passages(&self) -> &[Passage] {
        &self.passages
    }

    pub fn into_passages(self) -> Vec<Passage> {
        self.passages
    }

    fn read(path: &Path) -> Result<String, RetrievalError> {
        std::fs::read_to_string(path).map_err(|e| load_error(path, e))
    }

    fn load_json(path: &Path) -> Result<Self, RetrievalError> {
        let records: Vec<CorpusRecord> =
            serde_json::from_str(&Self::read(path)?).map_err(|e| load_error(path, e))?;
        Ok(Self::from_records(path, records))
    }

    fn load_jsonl(path: &Path) -> Result<Self, RetrievalError> {
        let content = Self::read(path)?;
        let records = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(n, line)| match serde_json::from_str::<CorpusRecord>(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(line = n + 1, error = %e, "Skipping malformed corpus record");
                    None
                }
            })
            .collect();
        Ok(Self::from_records(path, records))
    }

    fn from_records(path: &Path, records: Vec<CorpusRecord>) -> Self {
        let fallback = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let passages = records
            .into_iter()
            .filter(|r| !r.text.trim().is_empty())
            .map(|r| {
                let source = r.source.or(r.url).unwrap_or_else(|| fallback.clone());
                Passage::new(r.text, source)
            })
            .collect();
        Self { passages }
    }

    fn load_dir(dir: &Path, chunk_size: usize) -> Result<Self, RetrievalError> {
        let mut files = Vec::new();
        collect_documents(dir, &mut files).map_err(|e| load_error(dir, e))?;
        files.sort();

        let mut passages = Vec::new();
        for file in files {
            passages.extend(Self::load_document(&file, dir, chunk_size)?.passages);
        }
        Ok(Self { passages })
    }

    fn load_document(file: &Path, root: &Path, chunk_size: usize) -> Result<Self, RetrievalError> {
        let text = Self::read(file)?;
        let source = file
            .strip_prefix(root)
            .ok()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(file)
            .to_string_lossy()
            .replace('\\', "/");

        let chunks = chunk_text(&text, chunk_size);
        debug!(file = %file.display(), chunks = chunks.len(), "Chunked document");
        Ok(Self {
            passages: chunks
                .into_iter()
                .map(|chunk| Passage::new(chunk, source.clone()))
                .collect(),
        })
    }
}

fn load_error(path: &Path, e: impl std::fmt::Display) -> RetrievalError {
    RetrievalError::CorpusLoad {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

fn collect_documents(dir: &Path, out: &mut Vec<std::path::PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_documents(&path, out)?;
        } else if matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("md" | "txt" | "markdown")
        ) {
            out.push(path);
        }
    }
    Ok(())
}

/// Split text into chunks of at most `max_chars`, breaking on blank lines.
///
/// Paragraphs are packed greedily. A single paragraph longer than the limit
/// is split on whitespace.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if paragraph.chars().count() > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            chunks.extend(split_long(paragraph, max_chars));
            continue;
        }

        let joined_len = current.chars().count() + 2 + paragraph.chars().count();
        if !current.is_empty() && joined_len > max_chars {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn split_long(paragraph: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    for word in paragraph.split_whitespace() {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > max_chars {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunking_packs_paragraphs() {
        let text = "Alpha one.\n\nBeta two.\n\nGamma three.";
        let chunks = chunk_text(text, 25);
        assert_eq!(chunks, vec!["Alpha one.\n\nBeta two.", "Gamma three."]);
    }

    #[test]
    fn chunking_splits_oversized_paragraph() {
        let text = "one two three four five six";
        let chunks = chunk_text(text, 10);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks.join(" "), text);
    }

    #[test]
    fn load_json_array_with_url_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lore.json");
        std::fs::write(
            &path,
            r#"[
                {"text": "Aster is the capital of Lyria.", "source": "atlas/lyria.md"},
                {"text": "The crown is the currency.", "url": "https://wiki/coins"},
                {"text": "No source here."},
                {"text": "   "}
            ]"#,
        )
        .unwrap();

        let corpus = Corpus::load(&path, 800).unwrap();
        let sources: Vec<_> = corpus.passages().iter().map(|p| p.source_id.as_str()).collect();
        assert_eq!(sources, vec!["atlas/lyria.md", "https://wiki/coins", "lore.json"]);
    }

    #[test]
    fn load_jsonl_skips_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lore.jsonl");
        std::fs::write(
            &path,
            "{\"text\": \"first\", \"source\": \"a\"}\nnot json\n\n{\"text\": \"second\", \"source\": \"b\"}\n",
        )
        .unwrap();

        let corpus = Corpus::load(&path, 800).unwrap();
        assert_eq!(corpus.len(), 2);
    }

    #[test]
    fn load_directory_uses_relative_sources() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("atlas")).unwrap();
        std::fs::write(dir.path().join("atlas/lyria.md"), "Lyria was founded in 812.").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "The crown is silver.").unwrap();
        std::fs::write(dir.path().join("image.png"), "binary").unwrap();

        let corpus = Corpus::load(dir.path(), 800).unwrap();
        let mut sources: Vec<_> = corpus.passages().iter().map(|p| p.source_id.clone()).collect();
        sources.sort();
        assert_eq!(sources, vec!["atlas/lyria.md", "notes.txt"]);
    }

    #[test]
    fn missing_file_is_load_error() {
        let err = Corpus::load(Path::new("/nonexistent/lore.json"), 800).unwrap_err();
        assert!(matches!(err, RetrievalError::CorpusLoad { .. }));
    }
}
