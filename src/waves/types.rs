use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Overall shape of a wave plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaveStrategy {
    /// Small incremental steps for low-risk optimization
    Progressive,
    /// Extra review for risky, security-sensitive work
    Systematic,
    /// Default for mixed requests
    Adaptive,
    /// Batched implementation for very large scopes
    Enterprise,
}

impl WaveStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaveStrategy::Progressive => "PROGRESSIVE",
            WaveStrategy::Systematic => "SYSTEMATIC",
            WaveStrategy::Adaptive => "ADAPTIVE",
            WaveStrategy::Enterprise => "ENTERPRISE",
        }
    }
}

impl std::fmt::Display for WaveStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Discovery,
    Planning,
    Implementation,
    Validation,
    Review,
    Consolidation,
}

impl Stage {
    /// Canonical order every plan follows
    pub const CANONICAL: [Stage; 4] = [
        Stage::Discovery,
        Stage::Planning,
        Stage::Implementation,
        Stage::Validation,
    ];

    /// Outputs of these stages are checked before the plan moves on
    pub fn requires_validation(&self) -> bool {
        matches!(
            self,
            Stage::Implementation | Stage::Validation | Stage::Review | Stage::Consolidation
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Discovery => "DISCOVERY",
            Stage::Planning => "PLANNING",
            Stage::Implementation => "IMPLEMENTATION",
            Stage::Validation => "VALIDATION",
            Stage::Review => "REVIEW",
            Stage::Consolidation => "CONSOLIDATION",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveStatus {
    Pending,
    Running,
    Completed,
    Failed,
    RolledBack,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveTask {
    pub id: String,
    pub worker: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wave {
    pub id: String,
    pub stage: Stage,
    pub sequence: usize,
    pub tasks: Vec<WaveTask>,
    /// Ids of waves that must complete first
    pub dependencies: Vec<String>,
    pub status: WaveStatus,
    pub risk_level: f64,
    pub requires_validation: bool,
}

impl Wave {
    pub fn new(sequence: usize, stage: Stage, risk_level: f64) -> Self {
        Self {
            id: format!("wave-{sequence}"),
            stage,
            sequence,
            tasks: Vec::new(),
            dependencies: Vec::new(),
            status: WaveStatus::Pending,
            risk_level: risk_level.clamp(0.0, 1.0),
            requires_validation: stage.requires_validation(),
        }
    }

    pub fn with_task(mut self, worker: &str, description: impl Into<String>) -> Self {
        let id = format!("{}-task-{}", self.id, self.tasks.len() + 1);
        self.tasks.push(WaveTask {
            id,
            worker: worker.to_string(),
            description: description.into(),
        });
        self
    }

    pub fn depends_on(mut self, wave_id: impl Into<String>) -> Self {
        self.dependencies.push(wave_id.into());
        self
    }

    pub fn workers(&self) -> Vec<&str> {
        let mut workers: Vec<&str> = Vec::new();
        for task in &self.tasks {
            if !workers.contains(&task.worker.as_str()) {
                workers.push(task.worker.as_str());
            }
        }
        workers
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub level: f64,
    pub factors: Vec<String>,
    pub mitigations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WavePlan {
    pub id: String,
    pub tool_id: String,
    pub strategy: WaveStrategy,
    pub waves: Vec<Wave>,
    /// Waves after which plan state is safe to resume from
    pub checkpoints: BTreeSet<String>,
    pub estimated_duration_ms: u64,
    pub estimated_tokens: u64,
    pub risk_assessment: RiskAssessment,
    pub created_at: DateTime<Utc>,
}

impl WavePlan {
    pub fn wave(&self, wave_id: &str) -> Option<&Wave> {
        self.waves.iter().find(|w| w.id == wave_id)
    }

    pub fn is_checkpoint(&self, wave_id: &str) -> bool {
        self.checkpoints.contains(wave_id)
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.waves.iter().map(|w| w.stage).collect()
    }

    pub fn status_of(&self, wave_id: &str) -> Option<WaveStatus> {
        self.wave(wave_id).map(|w| w.status)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaveMetrics {
    pub duration_ms: u64,
    pub tokens_used: u64,
    pub tools_used: Vec<String>,
    pub errors_encountered: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveResult {
    pub wave_id: String,
    pub success: bool,
    pub outputs: Map<String, Value>,
    pub metrics: WaveMetrics,
    pub evidence: Value,
}

impl WaveResult {
    pub fn success(wave_id: impl Into<String>, outputs: Map<String, Value>) -> Self {
        Self {
            wave_id: wave_id.into(),
            success: true,
            outputs,
            metrics: WaveMetrics::default(),
            evidence: Value::Null,
        }
    }

    pub fn with_metrics(mut self, metrics: WaveMetrics) -> Self {
        self.metrics = metrics;
        self
    }
}

/// Accumulated outputs at a checkpoint wave
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub wave_id: String,
    pub outputs: Map<String, Value>,
    pub reached_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WaveEvent {
    PlanStarted {
        plan_id: String,
        strategy: WaveStrategy,
        waves: usize,
    },
    AdmissionDeferred {
        plan_id: String,
        wave_id: String,
        reason: String,
    },
    WaveStarted {
        plan_id: String,
        wave_id: String,
        stage: Stage,
    },
    WaveCompleted {
        plan_id: String,
        wave_id: String,
        duration_ms: u64,
    },
    WaveSkipped {
        plan_id: String,
        wave_id: String,
        unmet: Vec<String>,
    },
    WaveFailed {
        plan_id: String,
        wave_id: String,
        reason: String,
    },
    WaveRolledBack {
        plan_id: String,
        wave_id: String,
    },
    CheckpointReached {
        plan_id: String,
        wave_id: String,
    },
    PlanCompleted {
        plan_id: String,
        executed: usize,
        skipped: usize,
    },
}

/// Compiled result of a finished plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanOutcome {
    pub plan_id: String,
    pub strategy: WaveStrategy,
    /// Wave outputs merged in execution order; later waves overwrite
    pub outputs: Map<String, Value>,
    pub results: Vec<WaveResult>,
    pub skipped: Vec<String>,
    pub checkpoints: Vec<Checkpoint>,
    pub duration_ms: u64,
    pub tokens_used: u64,
}

impl PlanOutcome {
    pub fn result(&self, wave_id: &str) -> Option<&WaveResult> {
        self.results.iter().find(|r| r.wave_id == wave_id)
    }
}
