use thiserror::Error;

/// Main error type for the control plane
#[derive(Error, Debug)]
pub enum SextantError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    // Request errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    // Worker errors
    #[error("Worker not registered: {0}")]
    WorkerNotFound(String),

    // Wave plan errors
    #[error("Wave plan failed: {0}")]
    WavePlan(#[from] WaveError),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type alias for SextantError
pub type Result<T> = std::result::Result<T, SextantError>;

/// Plan-level failures raised by the wave engine
#[derive(Error, Debug, Clone)]
pub enum WaveError {
    #[error("wave {wave_id} of plan {plan_id} failed validation: {reason}")]
    ValidationFailed {
        plan_id: String,
        wave_id: String,
        reason: String,
        rolled_back: bool,
        last_checkpoint: Option<String>,
    },

    #[error("wave {wave_id} of plan {plan_id} failed to execute: {reason}")]
    ExecutionFailed {
        plan_id: String,
        wave_id: String,
        reason: String,
        rolled_back: bool,
        last_checkpoint: Option<String>,
    },

    #[error("plan {plan_id} cancelled before wave {wave_id} finished")]
    Cancelled { plan_id: String, wave_id: String },
}

impl WaveError {
    /// Wave that caused the plan to stop
    pub fn wave_id(&self) -> &str {
        match self {
            WaveError::ValidationFailed { wave_id, .. }
            | WaveError::ExecutionFailed { wave_id, .. }
            | WaveError::Cancelled { wave_id, .. } => wave_id,
        }
    }

    pub fn rolled_back(&self) -> bool {
        match self {
            WaveError::ValidationFailed { rolled_back, .. }
            | WaveError::ExecutionFailed { rolled_back, .. } => *rolled_back,
            WaveError::Cancelled { .. } => false,
        }
    }

    pub fn last_checkpoint(&self) -> Option<&str> {
        match self {
            WaveError::ValidationFailed {
                last_checkpoint, ..
            }
            | WaveError::ExecutionFailed {
                last_checkpoint, ..
            } => last_checkpoint.as_deref(),
            WaveError::Cancelled { .. } => None,
        }
    }
}
