use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The eight validation steps, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityStep {
    InputValidation,
    SecurityCheck,
    ResourceAvailability,
    Compatibility,
    Performance,
    DataIntegrity,
    OutputValidation,
    EvidenceGeneration,
}

impl QualityStep {
    pub const ALL: [QualityStep; 8] = [
        QualityStep::InputValidation,
        QualityStep::SecurityCheck,
        QualityStep::ResourceAvailability,
        QualityStep::Compatibility,
        QualityStep::Performance,
        QualityStep::DataIntegrity,
        QualityStep::OutputValidation,
        QualityStep::EvidenceGeneration,
    ];

    /// A failure here skips every later step
    pub fn is_critical(&self) -> bool {
        matches!(self, QualityStep::SecurityCheck | QualityStep::DataIntegrity)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityStep::InputValidation => "input_validation",
            QualityStep::SecurityCheck => "security_check",
            QualityStep::ResourceAvailability => "resource_availability",
            QualityStep::Compatibility => "compatibility",
            QualityStep::Performance => "performance",
            QualityStep::DataIntegrity => "data_integrity",
            QualityStep::OutputValidation => "output_validation",
            QualityStep::EvidenceGeneration => "evidence_generation",
        }
    }
}

impl std::fmt::Display for QualityStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-step pass thresholds, 0-100
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    pub input_validation: f64,
    pub security_check: f64,
    pub resource_availability: f64,
    pub compatibility: f64,
    pub performance: f64,
    /// No deduction tolerated
    pub data_integrity: f64,
    pub output_validation: f64,
    pub evidence_generation: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            input_validation: 95.0,
            security_check: 90.0,
            resource_availability: 80.0,
            compatibility: 85.0,
            performance: 75.0,
            data_integrity: 100.0,
            output_validation: 90.0,
            evidence_generation: 85.0,
        }
    }
}

impl QualityThresholds {
    pub fn for_step(&self, step: QualityStep) -> f64 {
        match step {
            QualityStep::InputValidation => self.input_validation,
            QualityStep::SecurityCheck => self.security_check,
            QualityStep::ResourceAvailability => self.resource_availability,
            QualityStep::Compatibility => self.compatibility,
            QualityStep::Performance => self.performance,
            QualityStep::DataIntegrity => self.data_integrity,
            QualityStep::OutputValidation => self.output_validation,
            QualityStep::EvidenceGeneration => self.evidence_generation,
        }
    }

    pub fn entries(&self) -> [(QualityStep, f64); 8] {
        QualityStep::ALL.map(|step| (step, self.for_step(step)))
    }
}

/// Whether inputs or produced outputs are being validated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPhase {
    PreFlight,
    PostFlight,
}

impl ValidationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationPhase::PreFlight => "pre_flight",
            ValidationPhase::PostFlight => "post_flight",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step: QualityStep,
    pub passed: bool,
    pub score: f64,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    pub evidence: Value,
    pub duration_ms: u64,
    /// Not run because an earlier critical step failed
    #[serde(default)]
    pub skipped: bool,
}

impl StepResult {
    pub(crate) fn skipped(step: QualityStep, cause: QualityStep) -> Self {
        Self {
            step,
            passed: false,
            score: 0.0,
            issues: vec![format!("skipped: critical step {cause} failed")],
            warnings: Vec::new(),
            evidence: Value::Null,
            duration_ms: 0,
            skipped: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub operation: String,
    pub phase: ValidationPhase,
    /// Always eight entries, in `QualityStep::ALL` order
    pub steps: Vec<StepResult>,
    pub overall_score: f64,
    pub passed: bool,
    pub context_retention: f64,
    pub recommendations: Vec<String>,
    pub evidence: Value,
    pub validated_at: DateTime<Utc>,
    #[serde(default)]
    pub from_cache: bool,
}

impl ValidationResult {
    pub fn step(&self, step: QualityStep) -> Option<&StepResult> {
        self.steps.iter().find(|r| r.step == step)
    }

    pub fn all_steps_passed(&self) -> bool {
        self.steps.iter().all(|r| r.passed)
    }

    pub fn failed_steps(&self) -> Vec<QualityStep> {
        self.steps.iter().filter(|r| !r.passed).map(|r| r.step).collect()
    }

    /// All issues, prefixed with their step
    pub fn issues(&self) -> Vec<String> {
        self.steps
            .iter()
            .flat_map(|r| r.issues.iter().map(move |i| format!("{}: {i}", r.step)))
            .collect()
    }
}
