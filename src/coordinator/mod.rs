//! Request coordination
//!
//! The `Orchestrator` owns one instance of every control-plane component and
//! drives a request through them.

mod executor;
mod orchestrator;
mod outcome;

pub use executor::FanOutExecutor;
pub use orchestrator::Orchestrator;
pub use outcome::{OrchestrationOutcome, OrchestratorStats, OutcomeStatus, PlanSummary};
