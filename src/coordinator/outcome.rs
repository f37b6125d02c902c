//! Request outcomes and pipeline counters

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::agents::WorkerFailure;
use crate::domain::RequestDescriptor;
use crate::governor::Admission;
use crate::quality::ValidationResult;
use crate::scheduler::RoutingDecision;
use crate::waves::{PlanOutcome, WaveStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Every worker produced output and validation passed
    Completed,
    /// Some workers failed; outputs of the rest are returned
    Partial,
    /// Refused by the governor; retry later
    Rejected,
    /// Pre-flight or post-flight quality gate failed
    ValidationFailed,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Completed => "completed",
            OutcomeStatus::Partial => "partial",
            OutcomeStatus::Rejected => "rejected",
            OutcomeStatus::ValidationFailed => "validation_failed",
        }
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wave plan digest carried on an outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub plan_id: String,
    pub strategy: WaveStrategy,
    pub executed: Vec<String>,
    pub skipped: Vec<String>,
    pub checkpoints: Vec<String>,
}

impl From<&PlanOutcome> for PlanSummary {
    fn from(outcome: &PlanOutcome) -> Self {
        Self {
            plan_id: outcome.plan_id.clone(),
            strategy: outcome.strategy,
            executed: outcome.results.iter().map(|r| r.wave_id.clone()).collect(),
            skipped: outcome.skipped.clone(),
            checkpoints: outcome.checkpoints.iter().map(|c| c.wave_id.clone()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationOutcome {
    pub request_id: String,
    pub status: OutcomeStatus,
    /// Why the request was rejected or failed validation
    pub reason: Option<String>,
    pub descriptor: RequestDescriptor,
    pub admission: Admission,
    pub routing: Option<RoutingDecision>,
    pub preflight: Option<ValidationResult>,
    pub postflight: Option<ValidationResult>,
    pub plan: Option<PlanSummary>,
    pub outputs: Map<String, Value>,
    pub failures: Vec<WorkerFailure>,
    pub tokens_used: u64,
    pub duration_ms: u64,
}

impl OrchestrationOutcome {
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Completed
    }
}

/// Point-in-time copy of the orchestrator counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorStats {
    pub requests: u64,
    pub completed: u64,
    pub partial: u64,
    pub rejected: u64,
    pub validation_failed: u64,
    pub wave_plans: u64,
    pub plan_failures: u64,
    pub cancelled: u64,
}

#[derive(Default)]
pub(crate) struct StatsCounters {
    requests: AtomicU64,
    completed: AtomicU64,
    partial: AtomicU64,
    rejected: AtomicU64,
    validation_failed: AtomicU64,
    wave_plans: AtomicU64,
    plan_failures: AtomicU64,
    cancelled: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn outcome(&self, status: OutcomeStatus) {
        let counter = match status {
            OutcomeStatus::Completed => &self.completed,
            OutcomeStatus::Partial => &self.partial,
            OutcomeStatus::Rejected => &self.rejected,
            OutcomeStatus::ValidationFailed => &self.validation_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn wave_plan(&self) {
        self.wave_plans.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn plan_failure(&self) {
        self.plan_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> OrchestratorStats {
        OrchestratorStats {
            requests: self.requests.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            partial: self.partial.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            validation_failed: self.validation_failed.load(Ordering::Relaxed),
            wave_plans: self.wave_plans.load(Ordering::Relaxed),
            plan_failures: self.plan_failures.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}
