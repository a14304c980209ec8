//! Retrieval and conversation history backends for Loresmith.

pub mod corpus;
pub mod factory;
pub mod file_history;
pub mod history;
pub mod keyword;
pub mod noop;

pub use corpus::{Corpus, chunk_text};
pub use factory::{build_history, build_retriever};
pub use file_history::FileHistory;
pub use history::InMemoryHistory;
pub use keyword::KeywordRetriever;
pub use noop::NoopRetriever;
