//! Wave engine: staged execution plans with checkpoints and rollback

mod engine;
mod planner;
mod types;

pub use engine::{GateValidator, WaveEngine, WaveExecutor, WaveValidator, WaveVerdict};
pub use planner::{WaveConfig, WavePlanner};
pub use types::{
    Checkpoint, PlanOutcome, RiskAssessment, Stage, Wave, WaveEvent, WaveMetrics, WavePlan,
    WaveResult, WaveStatus, WaveStrategy, WaveTask,
};
