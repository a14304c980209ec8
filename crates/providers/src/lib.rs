//! Generation backends for Loresmith.
//!
//! All providers implement the `loresmith_core::Provider` trait. The factory
//! builds them from configuration and the [`BackendRouter`] decides which
//! backend serves each workflow step.

pub mod anthropic;
pub mod factory;
pub mod openai_compat;
pub mod router;

pub use anthropic::AnthropicProvider;
pub use factory::{build_provider, build_user_backend, default_base_url, is_local};
pub use openai_compat::OpenAiCompatProvider;
pub use router::{BackendRouter, RouteInfo, WorkflowStep};
