//! Quality gate
//!
//! Runs the eight steps in fixed order against operation inputs (pre-flight)
//! or produced outputs (post-flight). Results are cached for a short TTL,
//! keyed by a hash of the operation, phase, payload and caller context.
//! Expired results are swept on insert, at most once per TTL.

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::checks::{default_checks, CheckInput, QualityCheck};
use super::context::ValidationContext;
use super::step::{QualityStep, QualityThresholds, StepResult, ValidationPhase, ValidationResult};
use crate::domain::{RequestDescriptor, ToolArgs};
use crate::error::Result;
use crate::governor::ResourceGovernor;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub thresholds: QualityThresholds,
    /// 0 disables result caching
    pub cache_ttl_secs: u64,
    pub min_context_retention: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            thresholds: QualityThresholds::default(),
            cache_ttl_secs: 60,
            min_context_retention: 90.0,
        }
    }
}

struct CachedResult {
    stored_at: Instant,
    result: ValidationResult,
}

pub struct QualityGate {
    config: QualityConfig,
    checks: BTreeMap<QualityStep, Arc<dyn QualityCheck>>,
    governor: Option<Arc<ResourceGovernor>>,
    cache_ttl: Duration,
    cache: DashMap<String, CachedResult>,
    last_sweep: Mutex<Instant>,
}

impl QualityGate {
    pub fn new(config: QualityConfig) -> Result<Self> {
        let checks = default_checks()?
            .into_iter()
            .map(|check| (check.step(), Arc::from(check)))
            .collect();
        Ok(Self {
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
            config,
            checks,
            governor: None,
            cache: DashMap::new(),
            last_sweep: Mutex::new(Instant::now()),
        })
    }

    /// Override the configured result TTL; zero disables caching
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Measure resource availability against a live governor
    pub fn with_governor(mut self, governor: Arc<ResourceGovernor>) -> Self {
        self.governor = Some(governor);
        self
    }

    /// Replace the check for `check.step()`
    pub fn with_check(mut self, check: Arc<dyn QualityCheck>) -> Self {
        self.checks.insert(check.step(), check);
        self
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// Pre-flight validation of raw inputs
    pub fn validate(
        &self,
        operation: &str,
        inputs: &ToolArgs,
        context: &ValidationContext,
    ) -> ValidationResult {
        self.run(operation, ValidationPhase::PreFlight, inputs, None, None, context)
    }

    /// Pre-flight validation of a classified request, including admission
    pub fn validate_request(
        &self,
        descriptor: &RequestDescriptor,
        context: &ValidationContext,
    ) -> ValidationResult {
        self.run(
            &descriptor.tool_id,
            ValidationPhase::PreFlight,
            &descriptor.args,
            None,
            Some(descriptor),
            context,
        )
    }

    /// Post-flight validation of produced outputs
    pub fn validate_outputs(
        &self,
        operation: &str,
        inputs: &ToolArgs,
        outputs: &Map<String, Value>,
        context: &ValidationContext,
    ) -> ValidationResult {
        self.run(
            operation,
            ValidationPhase::PostFlight,
            inputs,
            Some(outputs),
            None,
            context,
        )
    }

    fn run(
        &self,
        operation: &str,
        phase: ValidationPhase,
        inputs: &ToolArgs,
        outputs: Option<&Map<String, Value>>,
        descriptor: Option<&RequestDescriptor>,
        context: &ValidationContext,
    ) -> ValidationResult {
        let key = cache_key(operation, phase, inputs, outputs, context);
        if let Some(mut cached) = self.cached(&key) {
            debug!(operation, phase = phase.as_str(), "quality result served from cache");
            cached.from_cache = true;
            return cached;
        }

        let mut steps: Vec<StepResult> = Vec::with_capacity(QualityStep::ALL.len());
        let mut failed_critical: Option<QualityStep> = None;

        for step in QualityStep::ALL {
            if let Some(cause) = failed_critical {
                steps.push(StepResult::skipped(step, cause));
                continue;
            }

            let input = CheckInput {
                operation,
                phase,
                inputs,
                outputs,
                context,
                descriptor,
                governor: self.governor.as_deref(),
                completed: &steps,
            };
            let result = self.run_step(step, &input);

            if step.is_critical() && !result.passed {
                warn!(
                    operation,
                    step = %step,
                    issues = ?result.issues,
                    "critical quality step failed"
                );
                failed_critical = Some(step);
            }
            steps.push(result);
        }

        let overall_score = steps.iter().map(|s| s.score).sum::<f64>() / steps.len() as f64;
        let context_retention = context.retention();
        let all_passed = steps.iter().all(|s| s.passed);
        let passed = all_passed && context_retention >= self.config.min_context_retention;

        let recommendations = self.recommendations(&steps, failed_critical, context);
        let validated_at = Utc::now();
        let evidence = json!({
            "operation": operation,
            "phase": phase,
            "steps": steps
                .iter()
                .map(|s| (s.step.as_str().to_string(), s.evidence.clone()))
                .collect::<Map<String, Value>>(),
            "context_retention": context_retention,
            "validated_at": validated_at,
        });

        let result = ValidationResult {
            operation: operation.to_string(),
            phase,
            steps,
            overall_score,
            passed,
            context_retention,
            recommendations,
            evidence,
            validated_at,
            from_cache: false,
        };

        if passed {
            debug!(
                operation,
                phase = phase.as_str(),
                score = format!("{overall_score:.1}"),
                "quality gate passed"
            );
        } else {
            warn!(
                operation,
                phase = phase.as_str(),
                score = format!("{overall_score:.1}"),
                retention = context_retention,
                failed = ?result.failed_steps(),
                "quality gate failed"
            );
        }

        if !self.cache_ttl.is_zero() {
            self.sweep_if_due();
            self.cache.insert(
                key,
                CachedResult {
                    stored_at: Instant::now(),
                    result: result.clone(),
                },
            );
        }
        result
    }

    fn run_step(&self, step: QualityStep, input: &CheckInput<'_>) -> StepResult {
        let threshold = self.config.thresholds.for_step(step);
        let started = Instant::now();

        let outcome = match self.checks.get(&step) {
            Some(check) => check.run(input),
            None => Err(crate::error::SextantError::Internal(format!(
                "no check registered for {step}"
            ))),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(outcome) => {
                let score = if outcome.score.is_finite() {
                    outcome.score.clamp(0.0, 100.0)
                } else {
                    0.0
                };
                StepResult {
                    step,
                    passed: score >= threshold,
                    score,
                    issues: outcome.issues,
                    warnings: outcome.warnings,
                    evidence: outcome.evidence,
                    duration_ms,
                    skipped: false,
                }
            }
            Err(err) => {
                warn!(step = %step, error = %err, "quality check errored");
                StepResult {
                    step,
                    passed: false,
                    score: 0.0,
                    issues: vec![err.to_string()],
                    warnings: Vec::new(),
                    evidence: Value::Null,
                    duration_ms,
                    skipped: false,
                }
            }
        }
    }

    fn recommendations(
        &self,
        steps: &[StepResult],
        failed_critical: Option<QualityStep>,
        context: &ValidationContext,
    ) -> Vec<String> {
        let mut out: Vec<String> = steps
            .iter()
            .filter(|s| !s.passed && !s.skipped)
            .map(|s| {
                let advice = match s.step {
                    QualityStep::InputValidation => "fix malformed or missing arguments",
                    QualityStep::SecurityCheck => "remove unsafe content and secrets from the request",
                    QualityStep::ResourceAvailability => "retry once resource pressure drops",
                    QualityStep::Compatibility => "use a catalog tool and a supported chain",
                    QualityStep::Performance => "narrow the request scope",
                    QualityStep::DataIntegrity => "correct out-of-range or malformed values",
                    QualityStep::OutputValidation => "inspect failing workers before using the result",
                    QualityStep::EvidenceGeneration => "ensure every check records evidence",
                };
                format!("{}: {advice} (score {:.0})", s.step, s.score)
            })
            .collect();

        if let Some(cause) = failed_critical {
            out.push(format!("remaining steps were skipped; resolve {cause} first"));
        }

        let missing = context.missing_fields();
        if context.retention() < self.config.min_context_retention && !missing.is_empty() {
            out.push(format!("provide {} to preserve context", missing.join(", ")));
        }
        out
    }

    fn cached(&self, key: &str) -> Option<ValidationResult> {
        if self.cache_ttl.is_zero() {
            return None;
        }
        let fresh = self
            .cache
            .get(key)
            .filter(|entry| entry.stored_at.elapsed() < self.cache_ttl)
            .map(|entry| entry.result.clone());
        if fresh.is_none() {
            self.cache.remove(key);
        }
        fresh
    }

    fn sweep_if_due(&self) {
        {
            let mut last = self.last_sweep.lock().unwrap_or_else(|e| e.into_inner());
            if last.elapsed() < self.cache_ttl {
                return;
            }
            *last = Instant::now();
        }
        let purged = self.purge_expired();
        if purged > 0 {
            debug!(purged, "expired quality results swept");
        }
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let before = self.cache.len();
        self.cache
            .retain(|_, entry| entry.stored_at.elapsed() < self.cache_ttl);
        before.saturating_sub(self.cache.len())
    }

    /// Drop every cached result
    pub fn clear_cache(&self) -> usize {
        let count = self.cache.len();
        self.cache.clear();
        count
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

fn cache_key(
    operation: &str,
    phase: ValidationPhase,
    inputs: &ToolArgs,
    outputs: Option<&Map<String, Value>>,
    context: &ValidationContext,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(operation.as_bytes());
    hasher.update([0]);
    hasher.update(phase.as_str().as_bytes());
    hasher.update([0]);
    // ToolArgs and serde_json::Map are both sorted maps, so encoding is canonical
    hasher.update(serde_json::to_vec(inputs).unwrap_or_default());
    hasher.update([0]);
    if let Some(outputs) = outputs {
        hasher.update(serde_json::to_vec(outputs).unwrap_or_default());
    }
    hasher.update([0]);
    hasher.update(serde_json::to_vec(context).unwrap_or_default());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SextantError;
    use crate::governor::{GovernorConfig, ManualProbe};
    use crate::quality::checks::CheckOutcome;

    struct Fixed {
        step: QualityStep,
        score: f64,
    }

    impl QualityCheck for Fixed {
        fn step(&self) -> QualityStep {
            self.step
        }

        fn run(&self, _input: &CheckInput<'_>) -> Result<CheckOutcome> {
            Ok(CheckOutcome {
                score: self.score,
                evidence: json!({ "fixed": self.score }),
                ..CheckOutcome::default()
            })
        }
    }

    struct Failing(QualityStep);

    impl QualityCheck for Failing {
        fn step(&self) -> QualityStep {
            self.0
        }

        fn run(&self, _input: &CheckInput<'_>) -> Result<CheckOutcome> {
            Err(SextantError::Internal("probe offline".into()))
        }
    }

    fn gate() -> QualityGate {
        QualityGate::new(QualityConfig::default()).unwrap()
    }

    fn args() -> ToolArgs {
        let mut args = ToolArgs::new();
        args.insert("token".into(), json!("0xdAC17F958D2ee523a2206206994597C13D831ec7"));
        args
    }

    fn context() -> ValidationContext {
        ValidationContext::complete("session-1", "user-1", 50_000)
    }

    #[test]
    fn test_clean_request_passes() {
        let result = gate().validate("token_security_scan", &args(), &context());
        assert_eq!(result.steps.len(), 8);
        assert!(result.passed, "{:?}", result.issues());
        assert_eq!(result.overall_score, 100.0);
        assert!(result.recommendations.is_empty());
    }

    #[test]
    fn test_overall_is_mean_and_threshold_forces_failure() {
        let gate = gate().with_check(Arc::new(Fixed {
            step: QualityStep::Performance,
            score: 70.0,
        }));
        let result = gate.validate("token_security_scan", &args(), &context());

        let perf = result.step(QualityStep::Performance).unwrap();
        assert!(!perf.passed);
        assert!(perf.issues.is_empty());
        assert!(!result.passed);

        let mean = result.steps.iter().map(|s| s.score).sum::<f64>() / 8.0;
        assert!((result.overall_score - mean).abs() < 1e-9);
        assert!((result.overall_score - 96.25).abs() < 1e-9);
    }

    #[test]
    fn test_critical_failure_short_circuits() {
        let mut inputs = args();
        inputs.insert("path".into(), json!("../../secrets"));
        let result = gate().validate("token_security_scan", &inputs, &context());

        assert!(!result.passed);
        let security = result.step(QualityStep::SecurityCheck).unwrap();
        assert!(!security.passed && !security.skipped);
        for step in &result.steps[2..] {
            assert!(step.skipped);
            assert_eq!(step.score, 0.0);
        }
    }

    #[test]
    fn test_erroring_checks() {
        let gate = gate().with_check(Arc::new(Failing(QualityStep::Compatibility)));
        let result = gate.validate("token_security_scan", &args(), &context());
        let compat = result.step(QualityStep::Compatibility).unwrap();
        assert_eq!(compat.score, 0.0);
        assert!(compat.issues[0].contains("probe offline"));
        // non-critical: later steps still run
        assert!(!result.step(QualityStep::Performance).unwrap().skipped);

        let gate = QualityGate::new(QualityConfig::default())
            .unwrap()
            .with_check(Arc::new(Failing(QualityStep::DataIntegrity)));
        let result = gate.validate("token_security_scan", &args(), &context());
        assert!(result.step(QualityStep::OutputValidation).unwrap().skipped);
    }

    #[test]
    fn test_missing_context_fails_perfect_steps() {
        let partial = ValidationContext::new("session-1", "user-1");
        let result = gate().validate("token_security_scan", &args(), &partial);
        assert!(result.all_steps_passed());
        assert_eq!(result.context_retention, 70.0);
        assert!(!result.passed);
        assert!(result
            .recommendations
            .iter()
            .any(|r| r.contains("history") && r.contains("token_budget")));
    }

    #[test]
    fn test_results_are_cached() {
        let gate = gate();
        let first = gate.validate("token_security_scan", &args(), &context());
        assert!(!first.from_cache);
        let second = gate.validate("token_security_scan", &args(), &context());
        assert!(second.from_cache);
        assert_eq!(second.overall_score, first.overall_score);

        // different context is a different entry
        let other = gate.validate("token_security_scan", &args(), &ValidationContext::default());
        assert!(!other.from_cache);
        assert_eq!(gate.cache_len(), 2);
        assert_eq!(gate.clear_cache(), 2);
    }

    #[test]
    fn test_expired_results_are_recomputed_and_swept() {
        let gate = gate().with_cache_ttl(Duration::from_millis(20));
        let first = gate.validate("token_security_scan", &args(), &context());
        assert!(!first.from_cache);
        assert!(gate.validate("token_security_scan", &args(), &context()).from_cache);
        gate.validate("token_security_scan", &args(), &ValidationContext::default());
        assert_eq!(gate.cache_len(), 2);

        std::thread::sleep(Duration::from_millis(40));
        let again = gate.validate("token_security_scan", &args(), &context());
        assert!(!again.from_cache);
        assert!(again.validated_at > first.validated_at);
        // the other expired entry went with the sweep
        assert_eq!(gate.cache_len(), 1);

        let uncached = QualityGate::new(QualityConfig::default())
            .unwrap()
            .with_cache_ttl(Duration::ZERO);
        uncached.validate("token_security_scan", &args(), &context());
        assert!(!uncached.validate("token_security_scan", &args(), &context()).from_cache);
        assert_eq!(uncached.cache_len(), 0);
    }

    #[test]
    fn test_post_flight_requires_outputs() {
        let gate = gate();
        let empty = Map::new();
        let result = gate.validate_outputs("token_security_scan", &args(), &empty, &context());
        assert_eq!(result.phase, ValidationPhase::PostFlight);
        assert!(!result.step(QualityStep::OutputValidation).unwrap().passed);

        let mut outputs = Map::new();
        outputs.insert("security_agent".into(), json!({ "success": true, "risk_score": 12 }));
        let result = gate.validate_outputs("token_security_scan", &args(), &outputs, &context());
        assert!(result.passed, "{:?}", result.issues());
    }

    #[test]
    fn test_resource_step_uses_governor() {
        let probe = Arc::new(ManualProbe::uniform(90.0));
        let governor = Arc::new(ResourceGovernor::with_probe(GovernorConfig::default(), probe));
        governor.refresh();

        let gate = gate().with_governor(governor);
        let result = gate.validate("token_security_scan", &args(), &context());
        let resource = result.step(QualityStep::ResourceAvailability).unwrap();
        assert_eq!(resource.score, 60.0);
        assert!(!resource.passed);
    }
}
