//! Error types for the Loresmith domain.
//!
//! Each bounded context has its own `thiserror` enum. The workflow speaks a
//! smaller taxonomy, [`WorkflowError`], which every backend error folds into.

use serde::Serialize;
use thiserror::Error;

/// The top-level error type for all Loresmith operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Retrieval errors ---
    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    // --- History errors ---
    #[error("History error: {0}")]
    History(#[from] HistoryError),

    // --- Workflow errors ---
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    #[error("Retrieval backend unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Corpus load failed for {path}: {reason}")]
    CorpusLoad { path: String, reason: String },
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid thread id: {0}")]
    InvalidThread(String),
}

/// The error kinds the query workflow distinguishes.
///
/// An empty retrieval result is not represented here: it is a valid
/// outcome and flows through the pipeline as an empty passage list.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum WorkflowError {
    /// The call could not be made at all (construction, credentials, unknown model).
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The call was made but errored or timed out.
    #[error("Backend call failed: {0}")]
    BackendCallFailed(String),

    /// Structured output from a generation call could not be interpreted.
    #[error("Could not parse model output: {0}")]
    ParseFailure(String),
}

impl WorkflowError {
    /// Short machine-friendly name of the variant, used in events and API payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BackendUnavailable(_) => "backend_unavailable",
            Self::BackendCallFailed(_) => "backend_call_failed",
            Self::ParseFailure(_) => "parse_failure",
        }
    }

    /// The detail text without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::BackendUnavailable(m) | Self::BackendCallFailed(m) | Self::ParseFailure(m) => m,
        }
    }
}

impl From<ProviderError> for WorkflowError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotConfigured(_)
            | ProviderError::AuthenticationFailed(_)
            | ProviderError::ModelNotFound(_) => Self::BackendUnavailable(err.to_string()),
            ProviderError::ApiError { .. }
            | ProviderError::RateLimited { .. }
            | ProviderError::StreamInterrupted(_)
            | ProviderError::Timeout(_)
            | ProviderError::Network(_) => Self::BackendCallFailed(err.to_string()),
        }
    }
}

impl From<RetrievalError> for WorkflowError {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::Unavailable(_) | RetrievalError::CorpusLoad { .. } => {
                Self::BackendUnavailable(err.to_string())
            }
            RetrievalError::QueryFailed(_) => Self::BackendCallFailed(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_error_serializes_kind_and_message() {
        let err = WorkflowError::ParseFailure("no JSON object".into());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "parse_failure");
        assert_eq!(json["message"], "no JSON object");
        assert_eq!(err.message(), "no JSON object");
    }

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn construction_errors_classify_as_unavailable() {
        let err: WorkflowError = ProviderError::NotConfigured("no key".into()).into();
        assert_eq!(err.kind(), "backend_unavailable");

        let err: WorkflowError = ProviderError::AuthenticationFailed("401".into()).into();
        assert!(matches!(err, WorkflowError::BackendUnavailable(_)));
    }

    #[test]
    fn call_errors_classify_as_call_failed() {
        let err: WorkflowError = ProviderError::Timeout("30s".into()).into();
        assert!(matches!(err, WorkflowError::BackendCallFailed(_)));

        let err: WorkflowError = ProviderError::RateLimited { retry_after_secs: 5 }.into();
        assert_eq!(err.kind(), "backend_call_failed");
    }

    #[test]
    fn retrieval_errors_classify() {
        let err: WorkflowError = RetrievalError::Unavailable("down".into()).into();
        assert!(matches!(err, WorkflowError::BackendUnavailable(_)));

        let err: WorkflowError = RetrievalError::QueryFailed("bad".into()).into();
        assert!(err.to_string().contains("bad"));
    }
}
