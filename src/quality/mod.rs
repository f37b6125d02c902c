//! Quality gate: eight ordered validation steps with critical short-circuit

mod checks;
mod context;
mod gate;
mod step;

pub use checks::{
    default_checks, CheckInput, CheckOutcome, CompatibilityCheck, DataIntegrityCheck,
    EvidenceCheck, InputValidationCheck, OutputValidationCheck, PerformanceCheck, QualityCheck,
    ResourceCheck, SecurityCheck, SUPPORTED_CHAINS,
};
pub use context::ValidationContext;
pub use gate::{QualityConfig, QualityGate};
pub use step::{QualityStep, QualityThresholds, StepResult, ValidationPhase, ValidationResult};
