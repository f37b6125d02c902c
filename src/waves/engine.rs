//! Wave execution
//!
//! Runs a plan's waves one at a time in plan order. A wave whose
//! dependencies did not complete is skipped. Before each wave the engine
//! waits for governor admission; after each validated stage it consults the
//! validator and, on failure, rolls the wave back and aborts the plan.

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::planner::WaveConfig;
use super::types::{Checkpoint, PlanOutcome, Wave, WaveEvent, WavePlan, WaveResult, WaveStatus};
use crate::domain::{RequestDescriptor, ToolArgs};
use crate::error::{Result, WaveError};
use crate::governor::ResourceGovernor;
use crate::quality::{QualityGate, ValidationContext};

/// Executes the tasks of one wave
#[async_trait]
pub trait WaveExecutor: Send + Sync {
    async fn execute(
        &self,
        plan: &WavePlan,
        wave: &Wave,
        cancel: &CancellationToken,
    ) -> Result<WaveResult>;

    /// Best-effort compensation for a wave that failed validation
    async fn rollback(&self, _plan: &WavePlan, _wave: &Wave) -> Result<()> {
        Ok(())
    }
}

/// Verdict on a wave's outputs
#[derive(Debug, Clone, PartialEq)]
pub struct WaveVerdict {
    pub passed: bool,
    pub reason: Option<String>,
}

impl WaveVerdict {
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: Some(reason.into()),
        }
    }
}

#[async_trait]
pub trait WaveValidator: Send + Sync {
    async fn validate(
        &self,
        plan: &WavePlan,
        wave: &Wave,
        result: &WaveResult,
    ) -> Result<WaveVerdict>;
}

/// Validates wave outputs with the post-flight quality gate
pub struct GateValidator {
    gate: Arc<QualityGate>,
    inputs: ToolArgs,
    context: ValidationContext,
}

impl GateValidator {
    pub fn new(gate: Arc<QualityGate>, inputs: ToolArgs, context: ValidationContext) -> Self {
        Self {
            gate,
            inputs,
            context,
        }
    }
}

#[async_trait]
impl WaveValidator for GateValidator {
    async fn validate(
        &self,
        plan: &WavePlan,
        _wave: &Wave,
        result: &WaveResult,
    ) -> Result<WaveVerdict> {
        let validation =
            self.gate
                .validate_outputs(&plan.tool_id, &self.inputs, &result.outputs, &self.context);
        if validation.passed {
            Ok(WaveVerdict::pass())
        } else {
            let mut problems = validation.issues();
            if problems.is_empty() {
                problems = validation.recommendations.clone();
            }
            Ok(WaveVerdict::fail(format!(
                "quality score {:.1}: {}",
                validation.overall_score,
                problems.join("; ")
            )))
        }
    }
}

pub struct WaveEngine {
    config: WaveConfig,
    executor: Arc<dyn WaveExecutor>,
    validator: Option<Arc<dyn WaveValidator>>,
    governor: Option<Arc<ResourceGovernor>>,
    event_tx: broadcast::Sender<WaveEvent>,
}

impl WaveEngine {
    pub fn new(config: WaveConfig, executor: Arc<dyn WaveExecutor>) -> Self {
        let (event_tx, _) = broadcast::channel(128);
        Self {
            config,
            executor,
            validator: None,
            governor: None,
            event_tx,
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn WaveValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_governor(mut self, governor: Arc<ResourceGovernor>) -> Self {
        self.governor = Some(governor);
        self
    }

    /// Publish events on an existing channel instead of a private one
    pub fn with_event_sender(mut self, event_tx: broadcast::Sender<WaveEvent>) -> Self {
        self.event_tx = event_tx;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WaveEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: WaveEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Execute `plan` on behalf of `request`. Wave statuses are updated in place.
    pub async fn execute(
        &self,
        plan: &mut WavePlan,
        request: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<PlanOutcome> {
        let started = Instant::now();
        self.emit(WaveEvent::PlanStarted {
            plan_id: plan.id.clone(),
            strategy: plan.strategy,
            waves: plan.waves.len(),
        });
        info!(
            plan = %plan.id,
            strategy = %plan.strategy,
            waves = plan.waves.len(),
            "executing wave plan"
        );

        let mut completed: HashSet<String> = HashSet::new();
        let mut outputs: Map<String, Value> = Map::new();
        let mut results: Vec<WaveResult> = Vec::new();
        let mut skipped: Vec<String> = Vec::new();
        let mut checkpoints: Vec<Checkpoint> = Vec::new();
        let mut tokens_used = 0u64;

        for idx in 0..plan.waves.len() {
            let wave = plan.waves[idx].clone();

            let unmet: Vec<String> = wave
                .dependencies
                .iter()
                .filter(|dep| !completed.contains(*dep))
                .cloned()
                .collect();
            if !unmet.is_empty() {
                debug!(
                    plan = %plan.id,
                    wave = %wave.id,
                    unmet = ?unmet,
                    "skipping wave with unmet dependencies"
                );
                skipped.push(wave.id.clone());
                self.emit(WaveEvent::WaveSkipped {
                    plan_id: plan.id.clone(),
                    wave_id: wave.id.clone(),
                    unmet,
                });
                continue;
            }

            self.await_admission(plan, &wave, request, cancel).await?;

            plan.waves[idx].status = WaveStatus::Running;
            self.emit(WaveEvent::WaveStarted {
                plan_id: plan.id.clone(),
                wave_id: wave.id.clone(),
                stage: wave.stage,
            });
            let wave_started = Instant::now();

            let executed = tokio::select! {
                _ = cancel.cancelled() => None,
                result = self.executor.execute(plan, &wave, cancel) => Some(result),
            };
            let result = match executed {
                None => {
                    plan.waves[idx].status = WaveStatus::Failed;
                    warn!(plan = %plan.id, wave = %wave.id, "wave cancelled");
                    return Err(WaveError::Cancelled {
                        plan_id: plan.id.clone(),
                        wave_id: wave.id.clone(),
                    }
                    .into());
                }
                Some(Ok(result)) if result.success => result,
                Some(Ok(result)) => {
                    let reason = format!(
                        "wave reported failure with {} error(s)",
                        result.metrics.errors_encountered
                    );
                    return Err(self.fail_wave(plan, idx, &checkpoints, reason, false).await);
                }
                Some(Err(err)) => {
                    let reason = err.to_string();
                    return Err(self.fail_wave(plan, idx, &checkpoints, reason, false).await);
                }
            };

            let elapsed_ms = wave_started.elapsed().as_millis() as u64;
            let duration_ms = if result.metrics.duration_ms > 0 {
                result.metrics.duration_ms
            } else {
                elapsed_ms
            };
            tokens_used += result.metrics.tokens_used;
            if let Some(governor) = &self.governor {
                governor.report_usage(result.metrics.tokens_used, duration_ms);
            }

            if wave.requires_validation {
                if let Some(validator) = &self.validator {
                    let verdict = validator
                        .validate(plan, &wave, &result)
                        .await
                        .unwrap_or_else(|err| WaveVerdict::fail(format!("validator error: {err}")));
                    if !verdict.passed {
                        let reason = verdict
                            .reason
                            .unwrap_or_else(|| "validation failed".to_string());
                        return Err(self.fail_wave(plan, idx, &checkpoints, reason, true).await);
                    }
                }
            }

            plan.waves[idx].status = WaveStatus::Completed;
            completed.insert(wave.id.clone());
            for (key, value) in &result.outputs {
                outputs.insert(key.clone(), value.clone());
            }
            self.emit(WaveEvent::WaveCompleted {
                plan_id: plan.id.clone(),
                wave_id: wave.id.clone(),
                duration_ms,
            });
            debug!(
                plan = %plan.id,
                wave = %wave.id,
                stage = %wave.stage,
                duration_ms,
                "wave completed"
            );

            if plan.is_checkpoint(&wave.id) {
                checkpoints.push(Checkpoint {
                    wave_id: wave.id.clone(),
                    outputs: outputs.clone(),
                    reached_at: Utc::now(),
                });
                self.emit(WaveEvent::CheckpointReached {
                    plan_id: plan.id.clone(),
                    wave_id: wave.id.clone(),
                });
            }
            results.push(result);
        }

        self.emit(WaveEvent::PlanCompleted {
            plan_id: plan.id.clone(),
            executed: results.len(),
            skipped: skipped.len(),
        });
        info!(
            plan = %plan.id,
            executed = results.len(),
            skipped = skipped.len(),
            "wave plan completed"
        );

        Ok(PlanOutcome {
            plan_id: plan.id.clone(),
            strategy: plan.strategy,
            outputs,
            results,
            skipped,
            checkpoints,
            duration_ms: started.elapsed().as_millis() as u64,
            tokens_used,
        })
    }

    /// Mark the wave failed, roll it back, and build the plan-level error
    async fn fail_wave(
        &self,
        plan: &mut WavePlan,
        idx: usize,
        checkpoints: &[Checkpoint],
        reason: String,
        validation: bool,
    ) -> crate::error::SextantError {
        plan.waves[idx].status = WaveStatus::Failed;
        let wave = plan.waves[idx].clone();
        self.emit(WaveEvent::WaveFailed {
            plan_id: plan.id.clone(),
            wave_id: wave.id.clone(),
            reason: reason.clone(),
        });
        error!(plan = %plan.id, wave = %wave.id, reason = %reason, "wave failed; rolling back");

        let rolled_back = match self.executor.rollback(plan, &wave).await {
            Ok(()) => {
                plan.waves[idx].status = WaveStatus::RolledBack;
                self.emit(WaveEvent::WaveRolledBack {
                    plan_id: plan.id.clone(),
                    wave_id: wave.id.clone(),
                });
                true
            }
            Err(err) => {
                error!(plan = %plan.id, wave = %wave.id, error = %err, "rollback failed");
                false
            }
        };

        let last_checkpoint = checkpoints.last().map(|c| c.wave_id.clone());
        let plan_id = plan.id.clone();
        let wave_id = wave.id;
        let err = if validation {
            WaveError::ValidationFailed {
                plan_id,
                wave_id,
                reason,
                rolled_back,
                last_checkpoint,
            }
        } else {
            WaveError::ExecutionFailed {
                plan_id,
                wave_id,
                reason,
                rolled_back,
                last_checkpoint,
            }
        };
        err.into()
    }

    /// Block until the governor admits the request, backing off with jitter
    async fn await_admission(
        &self,
        plan: &WavePlan,
        wave: &Wave,
        request: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let Some(governor) = &self.governor else {
            return Ok(());
        };

        let mut backoff = self.config.admission_backoff_ms.max(1);
        let max_backoff = self.config.max_admission_backoff_ms.max(backoff);
        let mut announced = false;

        loop {
            if cancel.is_cancelled() {
                return Err(WaveError::Cancelled {
                    plan_id: plan.id.clone(),
                    wave_id: wave.id.clone(),
                }
                .into());
            }
            // without a monitor nothing else would refresh the view
            if !governor.is_monitoring() {
                governor.refresh();
            }

            let admission = governor.admit(request);
            if admission.allowed {
                return Ok(());
            }

            let reason = admission.reason.unwrap_or_default();
            if !announced {
                warn!(
                    plan = %plan.id,
                    wave = %wave.id,
                    zone = %admission.zone,
                    reason = %reason,
                    "wave deferred by governor"
                );
                self.emit(WaveEvent::AdmissionDeferred {
                    plan_id: plan.id.clone(),
                    wave_id: wave.id.clone(),
                    reason,
                });
                announced = true;
            }

            let jitter = rand::thread_rng().gen_range(0..=backoff / 4);
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(WaveError::Cancelled {
                        plan_id: plan.id.clone(),
                        wave_id: wave.id.clone(),
                    }
                    .into());
                }
                _ = tokio::time::sleep(Duration::from_millis(backoff + jitter)) => {}
            }
            backoff = (backoff * 2).min(max_backoff);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ComplexityLevel, ResourceEstimate};
    use crate::error::SextantError;
    use crate::governor::{GovernorConfig, ManualProbe};
    use crate::waves::types::{Stage, WaveStrategy};
    use crate::waves::WavePlanner;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        executed: Mutex<Vec<String>>,
        rolled_back: Mutex<Vec<String>>,
        fail_execution: Option<String>,
    }

    #[async_trait]
    impl WaveExecutor for Recorder {
        async fn execute(
            &self,
            _plan: &WavePlan,
            wave: &Wave,
            _cancel: &CancellationToken,
        ) -> Result<WaveResult> {
            self.executed.lock().unwrap().push(wave.id.clone());
            if self.fail_execution.as_deref() == Some(wave.id.as_str()) {
                return Err(SextantError::Internal("worker crashed".into()));
            }
            let mut outputs = Map::new();
            outputs.insert("last".into(), json!(wave.id));
            outputs.insert(wave.id.clone(), json!(wave.sequence));
            Ok(WaveResult::success(wave.id.clone(), outputs))
        }

        async fn rollback(&self, _plan: &WavePlan, wave: &Wave) -> Result<()> {
            self.rolled_back.lock().unwrap().push(wave.id.clone());
            Ok(())
        }
    }

    struct RejectWave(&'static str);

    #[async_trait]
    impl WaveValidator for RejectWave {
        async fn validate(
            &self,
            _plan: &WavePlan,
            wave: &Wave,
            _result: &WaveResult,
        ) -> Result<WaveVerdict> {
            if wave.id == self.0 {
                Ok(WaveVerdict::fail("integrity violated"))
            } else {
                Ok(WaveVerdict::pass())
            }
        }
    }

    fn request() -> RequestDescriptor {
        RequestDescriptor {
            tool_id: "risk_dashboard".into(),
            args: ToolArgs::new(),
            complexity_score: 0.8,
            complexity_level: ComplexityLevel::Complex,
            domains: BTreeSet::new(),
            operations: BTreeSet::new(),
            confidence: 0.8,
            risk_score: 0.3,
            priority_score: 0.5,
            resource_estimate: ResourceEstimate::new(1_000, 1_000, 64),
            suggested_workers: vec!["market_agent".into()],
            wave_eligible: true,
            parallel_eligible: false,
            scope_size: 30,
            realtime: false,
        }
    }

    fn three_wave_plan() -> WavePlan {
        WavePlan {
            id: "plan-test".into(),
            tool_id: "risk_dashboard".into(),
            strategy: WaveStrategy::Adaptive,
            waves: vec![
                Wave::new(1, Stage::Discovery, 0.2).with_task("market_agent", "collect"),
                Wave::new(2, Stage::Implementation, 0.4)
                    .with_task("market_agent", "analyze")
                    .depends_on("wave-1"),
                Wave::new(3, Stage::Validation, 0.3)
                    .with_task("market_agent", "check")
                    .depends_on("wave-2"),
            ],
            checkpoints: ["wave-3".to_string()].into_iter().collect(),
            estimated_duration_ms: 0,
            estimated_tokens: 0,
            risk_assessment: crate::waves::RiskAssessment {
                level: 0.3,
                factors: vec![],
                mitigations: vec![],
            },
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_validation_failure_rolls_back_and_aborts() {
        let executor = Arc::new(Recorder::default());
        let engine = WaveEngine::new(WaveConfig::default(), executor.clone())
            .with_validator(Arc::new(RejectWave("wave-2")));
        let mut plan = three_wave_plan();

        let err = engine
            .execute(&mut plan, &request(), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            SextantError::WavePlan(WaveError::ValidationFailed {
                wave_id,
                rolled_back,
                ..
            }) => {
                assert_eq!(wave_id, "wave-2");
                assert!(rolled_back);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(*executor.executed.lock().unwrap(), vec!["wave-1", "wave-2"]);
        assert_eq!(*executor.rolled_back.lock().unwrap(), vec!["wave-2"]);
        assert_eq!(plan.status_of("wave-1"), Some(WaveStatus::Completed));
        assert_eq!(plan.status_of("wave-2"), Some(WaveStatus::RolledBack));
        assert_eq!(plan.status_of("wave-3"), Some(WaveStatus::Pending));
    }

    #[tokio::test]
    async fn test_outputs_merge_in_order_and_checkpoint() {
        let engine = WaveEngine::new(WaveConfig::default(), Arc::new(Recorder::default()));
        let mut events = engine.subscribe();
        let mut plan = three_wave_plan();

        let outcome = engine
            .execute(&mut plan, &request(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.results.len(), 3);
        assert_eq!(outcome.outputs.get("last"), Some(&json!("wave-3")));
        assert_eq!(outcome.outputs.get("wave-1"), Some(&json!(1)));
        assert_eq!(outcome.checkpoints.len(), 1);
        assert_eq!(outcome.checkpoints[0].wave_id, "wave-3");

        let mut saw_checkpoint = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, WaveEvent::CheckpointReached { .. }) {
                saw_checkpoint = true;
            }
        }
        assert!(saw_checkpoint);
    }

    #[tokio::test]
    async fn test_unmet_dependencies_are_skipped() {
        let executor = Arc::new(Recorder::default());
        let engine = WaveEngine::new(WaveConfig::default(), executor.clone());
        let mut plan = three_wave_plan();
        plan.waves.insert(
            1,
            Wave::new(9, Stage::Planning, 0.1)
                .with_task("market_agent", "orphan")
                .depends_on("wave-missing"),
        );

        let outcome = engine
            .execute(&mut plan, &request(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.skipped, vec!["wave-9"]);
        assert!(outcome.result("wave-9").is_none());
        assert_eq!(outcome.results.len(), 3);
        assert_eq!(plan.status_of("wave-9"), Some(WaveStatus::Pending));
    }

    #[tokio::test]
    async fn test_execution_error_is_plan_failure() {
        let executor = Arc::new(Recorder {
            fail_execution: Some("wave-1".into()),
            ..Recorder::default()
        });
        let engine = WaveEngine::new(WaveConfig::default(), executor.clone());
        let mut plan = three_wave_plan();

        let err = engine
            .execute(&mut plan, &request(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SextantError::WavePlan(WaveError::ExecutionFailed { .. })
        ));
        assert_eq!(executor.executed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_waits_for_admission_and_honours_cancel() {
        let probe = Arc::new(ManualProbe::uniform(96.0));
        let governor = Arc::new(ResourceGovernor::with_probe(
            GovernorConfig::default(),
            probe.clone(),
        ));
        let config = WaveConfig {
            admission_backoff_ms: 5,
            max_admission_backoff_ms: 20,
            ..WaveConfig::default()
        };
        let executor = Arc::new(Recorder::default());
        let engine = Arc::new(
            WaveEngine::new(config, executor.clone()).with_governor(governor.clone()),
        );

        // pressure drops while the engine is waiting
        let relief = probe.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            relief.set_uniform(10.0);
        });
        let mut plan = three_wave_plan();
        let outcome = engine
            .execute(&mut plan, &request(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.results.len(), 3);
        assert!(governor.usage_totals().operations >= 3);

        probe.set_uniform(96.0);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });
        let mut plan = three_wave_plan();
        let err = engine.execute(&mut plan, &request(), &cancel).await.unwrap_err();
        assert!(matches!(err, SextantError::WavePlan(WaveError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_planned_waves_execute_end_to_end() {
        let executor = Arc::new(Recorder::default());
        let engine = WaveEngine::new(WaveConfig::default(), executor.clone());
        let mut plan = WavePlanner::default().plan(&request());

        let outcome = engine
            .execute(&mut plan, &request(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.results.len(), plan.waves.len());
        assert!(plan.waves.iter().all(|w| w.status == WaveStatus::Completed));
    }
}
