//! # Loresmith Core
//!
//! Domain types, traits, and error definitions for the Loresmith question
//! answering workflow. Every collaborator (generation backend, retriever,
//! history store, persona) is a trait here; implementations live in their
//! own crates so they can be swapped by configuration or mocked in tests.

pub mod error;
pub mod event;
pub mod history;
pub mod message;
pub mod persona;
pub mod provider;
pub mod retrieval;

// Re-export key types at crate root for ergonomics
pub use error::{Error, HistoryError, ProviderError, Result, RetrievalError, WorkflowError};
pub use event::{DomainEvent, EventBus};
pub use history::HistoryStore;
pub use message::{Conversation, Message, Role, ThreadId};
pub use persona::{Persona, PersonaKind, PromptTemplate};
pub use provider::{Backend, ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
pub use retrieval::{Passage, Retriever, unique_sources};
