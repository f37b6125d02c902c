pub mod agents;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod governor;
pub mod quality;
pub mod scheduler;
pub mod waves;

pub use agents::{DataBridge, FanOut, WorkerAgent, WorkerRegistry};
pub use classifier::Classifier;
pub use config::AppConfig;
pub use coordinator::{OrchestrationOutcome, Orchestrator, OutcomeStatus};
pub use domain::{RequestDescriptor, ToolArgs};
pub use error::{Result, SextantError};
pub use governor::{ResourceGovernor, Zone};
pub use quality::{QualityGate, ValidationContext};
pub use scheduler::{RoutingDecision, Scheduler};
pub use waves::{WaveEngine, WavePlan, WavePlanner};
