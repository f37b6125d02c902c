//! Scheduler: worker ordering, execution strategy, fallbacks

mod dependencies;
mod router;

pub use dependencies::WorkerGraph;
pub use router::{ExecutionStrategy, RoutingDecision, Scheduler, SchedulerConfig, ToolRoute};
