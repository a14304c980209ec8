//! # Loresmith Workflow
//!
//! The agentic query workflow. A turn runs four stages:
//!
//! 1. **Decompose**: one routed call decides whether the question is atomic
//!    or composite and, if composite, splits it into subqueries.
//! 2. **Resolve**: every subquery runs retrieve → evaluate → refine → answer
//!    in its own Tokio task, with at most one refinement.
//! 3. **Combine**: sub-answers are merged; a single subquery passes through.
//! 4. **Format**: the persona renders the answer on the caller's backend,
//!    complete or streamed.
//!
//! Each stage has a local fallback, so `AgenticWorkflow::process_turn` always
//! returns an answer. Failed subqueries are recorded on the turn state rather
//! than raised.

pub mod combiner;
pub mod decomposer;
pub mod engine;
pub mod fanout;
pub mod formatter;
pub mod observer;
pub mod parser;
pub mod prompts;
pub mod resolver;
pub mod state;

#[cfg(test)]
mod test_helpers;

pub use combiner::Combiner;
pub use decomposer::{Decomposer, Decomposition};
pub use engine::{AgenticWorkflow, TurnOutcome, TurnStream, WorkflowSettings};
pub use fanout::resolve_all;
pub use formatter::{FormatInput, ResponseFormatter, build_context};
pub use observer::{TurnObserver, TurnSummary};
pub use parser::{extract_json, normalize_content, parse_json};
pub use resolver::Resolver;
pub use state::{
    Complexity, Evaluation, MAX_REFINEMENTS, SubQuery, SubQueryStatus, TransitionError, TurnState, merge_sources,
};
