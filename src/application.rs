//! Application layer module
//!
//! The accumulator and the orchestrator that drives batch attempts through
//! the infrastructure collaborators.

pub mod accumulator;
pub mod orchestrator;
pub mod plan;

pub use accumulator::{AccumulatorError, MergeOutcome, SharedAccumulator, TokenAccumulator};
pub use orchestrator::{AttemptOutcome, BatchOrchestrator, OrchestratorConfig, RunSummary};
pub use plan::{BatchPlan, BatchRequest, OffsetCursor};
