//! Worker agents and the data bridge they pull from
//!
//! Workers implement `WorkerAgent`; the orchestrator reaches them through a
//! `WorkerRegistry` and runs them with `FanOut`.

mod bridge;
mod fanout;
mod registry;
mod worker;

pub use bridge::{BridgeResponse, CachedBridge, DataBridge, StaticBridge};
pub use fanout::{FanOut, FanOutReport, WorkerFailure, FALLBACK_FOR};
pub use registry::{WorkerRegistry, STANDARD_WORKERS};
pub use worker::{BridgeWorker, WorkerAgent, WorkerContext, WorkerResponse};
