//! Turn tracing for Loresmith.
//!
//! `TurnRecorder` listens on the workflow's event bus and folds each turn's
//! events into a `TurnTrace`: step spans with their backend and duration,
//! subquery transitions, recovered errors and the final totals. The most
//! recent traces are kept in memory for the gateway and CLI.

pub mod model;
pub mod recorder;

pub use model::{ErrorRecord, StepSpan, TransitionRecord, TurnTrace, UsageSnapshot};
pub use recorder::{DEFAULT_CAPACITY, TurnRecorder};

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("unknown trace id: {0}")]
    UnknownTrace(String),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}
