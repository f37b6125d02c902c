//! Wave planning
//!
//! Decides whether a request warrants staged execution, picks a strategy,
//! and lays out a linear chain of waves over the canonical stages.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::info;
use uuid::Uuid;

use super::types::{RiskAssessment, Stage, Wave, WavePlan, WaveStrategy};
use crate::classifier::FALLBACK_WORKER;
use crate::domain::{arg_f64, arg_flag, OperationTag, RequestDescriptor};

const ENTERPRISE_SCOPE: usize = 100;
const ENTERPRISE_TOKEN_BUDGET: f64 = 300_000.0;
const SYSTEMATIC_RISK: f64 = 0.7;
const PROGRESSIVE_MAX_RISK: f64 = 0.4;
const CHECKPOINT_RISK: f64 = 0.8;
const MAX_IMPLEMENTATION_BATCHES: usize = 4;

const TOKENS_PER_ITEM: f64 = 500.0;
const TOKENS_PER_WAVE: f64 = 2_000.0;
const MS_PER_ITEM: f64 = 200.0;
const MS_PER_WAVE: f64 = 1_000.0;

const INCREMENTAL_FLAGS: &[&str] = &["incremental", "progressive"];
const TOKEN_BUDGET_ARGS: &[&str] = &["token_budget", "max_tokens"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveConfig {
    pub complexity_threshold: f64,
    /// Scope must exceed this
    pub scope_threshold: usize,
    /// Distinct operation types must exceed this
    pub operation_threshold: usize,
    pub admission_backoff_ms: u64,
    pub max_admission_backoff_ms: u64,
}

impl Default for WaveConfig {
    fn default() -> Self {
        Self {
            complexity_threshold: 0.7,
            scope_threshold: 20,
            operation_threshold: 2,
            admission_backoff_ms: 250,
            max_admission_backoff_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WavePlanner {
    config: WaveConfig,
}

impl WavePlanner {
    pub fn new(config: WaveConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WaveConfig {
        &self.config
    }

    /// Wave mode needs all three: high complexity, wide scope, many operation types
    pub fn should_use_waves(
        &self,
        complexity: f64,
        scope_size: usize,
        operation_types: usize,
    ) -> bool {
        complexity >= self.config.complexity_threshold
            && scope_size > self.config.scope_threshold
            && operation_types > self.config.operation_threshold
    }

    /// The classifier must have marked the request wave-eligible as well
    pub fn should_plan(&self, descriptor: &RequestDescriptor) -> bool {
        descriptor.wave_eligible
            && self.should_use_waves(
            descriptor.complexity_score,
            descriptor.scope_size,
            descriptor.operation_count(),
        )
    }

    fn token_budget(descriptor: &RequestDescriptor) -> f64 {
        TOKEN_BUDGET_ARGS
            .iter()
            .find_map(|name| arg_f64(&descriptor.args, name))
            .unwrap_or(descriptor.resource_estimate.tokens as f64)
    }

    pub fn select_strategy(&self, descriptor: &RequestDescriptor) -> WaveStrategy {
        let security_sensitive = descriptor.domains.iter().any(|d| d.is_security_sensitive());
        let incremental = descriptor.has_operation(OperationTag::Optimize)
            || arg_flag(&descriptor.args, INCREMENTAL_FLAGS);

        if descriptor.scope_size > ENTERPRISE_SCOPE
            || Self::token_budget(descriptor) > ENTERPRISE_TOKEN_BUDGET
        {
            WaveStrategy::Enterprise
        } else if descriptor.risk_score >= SYSTEMATIC_RISK && security_sensitive {
            WaveStrategy::Systematic
        } else if incremental && descriptor.risk_score < PROGRESSIVE_MAX_RISK {
            WaveStrategy::Progressive
        } else {
            WaveStrategy::Adaptive
        }
    }

    fn stages(strategy: WaveStrategy, scope_size: usize) -> Vec<Stage> {
        match strategy {
            WaveStrategy::Progressive | WaveStrategy::Adaptive => Stage::CANONICAL.to_vec(),
            WaveStrategy::Systematic => {
                let mut stages = Stage::CANONICAL.to_vec();
                stages.push(Stage::Review);
                stages
            }
            WaveStrategy::Enterprise => {
                let batches = scope_size
                    .div_ceil(ENTERPRISE_SCOPE)
                    .clamp(1, MAX_IMPLEMENTATION_BATCHES);
                let mut stages = vec![Stage::Discovery, Stage::Planning];
                stages.extend(std::iter::repeat(Stage::Implementation).take(batches));
                stages.push(Stage::Validation);
                stages.push(Stage::Consolidation);
                stages
            }
        }
    }

    fn stage_risk(base: f64, stage: Stage) -> f64 {
        let adjusted = match stage {
            Stage::Discovery | Stage::Planning => base - 0.1,
            Stage::Implementation => base + 0.1,
            Stage::Validation | Stage::Review => base,
            Stage::Consolidation => base - 0.05,
        };
        adjusted.clamp(0.0, 1.0)
    }

    fn build_wave(
        sequence: usize,
        stage: Stage,
        risk: f64,
        workers: &[String],
        batch: Option<(usize, usize)>,
        tool_id: &str,
    ) -> Wave {
        let lead = workers.first().map(String::as_str).unwrap_or(FALLBACK_WORKER);
        let wave = Wave::new(sequence, stage, risk);

        match stage {
            Stage::Discovery => workers.iter().fold(wave, |w, worker| {
                w.with_task(worker, format!("collect inputs for {tool_id}"))
            }),
            Stage::Planning => wave.with_task(lead, format!("plan analysis of {tool_id}")),
            Stage::Implementation => {
                let label = match batch {
                    Some((n, total)) if total > 1 => format!(" (batch {n}/{total})"),
                    _ => String::new(),
                };
                workers.iter().fold(wave, |w, worker| {
                    w.with_task(worker, format!("run analysis{label}"))
                })
            }
            Stage::Validation => workers.iter().fold(wave, |w, worker| {
                w.with_task(worker, "cross-check results")
            }),
            Stage::Review => {
                let reviewer = workers
                    .iter()
                    .find(|w| w.as_str() == "security_agent")
                    .map(String::as_str)
                    .unwrap_or(lead);
                wave.with_task(reviewer, "security review of results")
            }
            Stage::Consolidation => wave.with_task(lead, "consolidate batch results"),
        }
    }

    fn assess(descriptor: &RequestDescriptor, strategy: WaveStrategy) -> RiskAssessment {
        let mut factors = Vec::new();
        let mut mitigations = vec!["validation after every implementation wave".to_string()];

        for domain in descriptor.domains.iter().filter(|d| d.is_security_sensitive()) {
            factors.push(format!("security-sensitive domain: {domain}"));
        }
        if descriptor.has_operation(OperationTag::Execute) {
            factors.push("state-changing execution requested".to_string());
        }
        if descriptor.scope_size > ENTERPRISE_SCOPE {
            factors.push(format!("large scope: {} items", descriptor.scope_size));
        }
        if descriptor.complexity_score >= 0.9 {
            factors.push("very high complexity".to_string());
        }
        if descriptor.domain_count() > 3 {
            factors.push(format!("{} domains involved", descriptor.domain_count()));
        }

        match strategy {
            WaveStrategy::Systematic => {
                mitigations.push("dedicated review stage".to_string());
                mitigations.push("checkpoints after high-risk waves".to_string());
            }
            WaveStrategy::Enterprise => {
                mitigations.push("batched implementation".to_string());
                mitigations.push("consolidation stage".to_string());
            }
            WaveStrategy::Progressive => {
                mitigations.push("incremental changes".to_string());
            }
            WaveStrategy::Adaptive => {}
        }

        RiskAssessment {
            level: descriptor.risk_score.clamp(0.0, 1.0),
            factors,
            mitigations,
        }
    }

    /// Token estimate; non-decreasing in scope, complexity and wave count
    pub fn estimate_tokens(scope_size: usize, complexity: f64, waves: usize) -> u64 {
        let c = complexity.clamp(0.0, 1.0);
        (scope_size as f64 * TOKENS_PER_ITEM * (1.0 + c) + waves as f64 * TOKENS_PER_WAVE).round()
            as u64
    }

    /// Duration estimate; non-decreasing in scope, complexity and wave count
    pub fn estimate_duration_ms(scope_size: usize, complexity: f64, waves: usize) -> u64 {
        let c = complexity.clamp(0.0, 1.0);
        (scope_size as f64 * MS_PER_ITEM * (1.0 + c) + waves as f64 * MS_PER_WAVE).round() as u64
    }

    pub fn plan(&self, descriptor: &RequestDescriptor) -> WavePlan {
        let strategy = self.select_strategy(descriptor);
        let stages = Self::stages(strategy, descriptor.scope_size);
        let total_batches = stages.iter().filter(|s| **s == Stage::Implementation).count();

        let workers: Vec<String> = if descriptor.suggested_workers.is_empty() {
            vec![FALLBACK_WORKER.to_string()]
        } else {
            descriptor.suggested_workers.clone()
        };

        let mut waves: Vec<Wave> = Vec::with_capacity(stages.len());
        let mut batch = 0;
        for (idx, stage) in stages.iter().enumerate() {
            let sequence = idx + 1;
            if *stage == Stage::Implementation {
                batch += 1;
            }
            let risk = Self::stage_risk(descriptor.risk_score, *stage);
            let mut wave = Self::build_wave(
                sequence,
                *stage,
                risk,
                &workers,
                (*stage == Stage::Implementation).then_some((batch, total_batches)),
                &descriptor.tool_id,
            );
            if let Some(previous) = waves.last() {
                wave = wave.depends_on(previous.id.clone());
            }
            waves.push(wave);
        }

        let checkpoints: BTreeSet<String> = waves
            .iter()
            .filter(|w| {
                w.stage == Stage::Validation
                    || (strategy == WaveStrategy::Systematic && w.risk_level >= CHECKPOINT_RISK)
            })
            .map(|w| w.id.clone())
            .collect();

        let plan = WavePlan {
            id: Uuid::new_v4().to_string(),
            tool_id: descriptor.tool_id.clone(),
            strategy,
            estimated_duration_ms: Self::estimate_duration_ms(
                descriptor.scope_size,
                descriptor.complexity_score,
                waves.len(),
            ),
            estimated_tokens: Self::estimate_tokens(
                descriptor.scope_size,
                descriptor.complexity_score,
                waves.len(),
            ),
            risk_assessment: Self::assess(descriptor, strategy),
            waves,
            checkpoints,
            created_at: Utc::now(),
        };

        info!(
            plan = %plan.id,
            tool = %plan.tool_id,
            strategy = %plan.strategy,
            waves = plan.waves.len(),
            checkpoints = plan.checkpoints.len(),
            "wave plan created"
        );
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ComplexityLevel, DomainTag, ResourceEstimate, ToolArgs};

    fn descriptor(complexity: f64, scope: usize, risk: f64) -> RequestDescriptor {
        RequestDescriptor {
            tool_id: "risk_dashboard".into(),
            args: ToolArgs::new(),
            complexity_score: complexity,
            complexity_level: ComplexityLevel::from_score(complexity),
            domains: [DomainTag::Market].into_iter().collect(),
            operations: [OperationTag::Analyze, OperationTag::Scan, OperationTag::Compare]
                .into_iter()
                .collect(),
            confidence: 0.8,
            risk_score: risk,
            priority_score: 0.5,
            resource_estimate: ResourceEstimate::new(25_000, 25_000, 256),
            suggested_workers: vec!["market_agent".into(), "security_agent".into()],
            wave_eligible: true,
            parallel_eligible: true,
            scope_size: scope,
            realtime: false,
        }
    }

    #[test]
    fn test_gate_requires_all_three_factors() {
        let planner = WavePlanner::default();
        assert!(!planner.should_use_waves(0.9, 10, 3));
        assert!(!planner.should_use_waves(0.5, 30, 3));
        assert!(planner.should_use_waves(0.8, 25, 3));
        assert!(!planner.should_use_waves(1.0, 1_000, 2));
        assert!(planner.should_use_waves(0.7, 21, 3));
    }

    #[test]
    fn test_ineligible_request_is_never_planned() {
        let planner = WavePlanner::new(WaveConfig {
            complexity_threshold: 0.5,
            ..WaveConfig::default()
        });
        let mut d = descriptor(0.6, 30, 0.1);
        assert!(planner.should_plan(&d));

        d.wave_eligible = false;
        assert!(planner.should_use_waves(0.6, 30, 3));
        assert!(!planner.should_plan(&d));
    }

    #[test]
    fn test_strategy_priority_order() {
        let planner = WavePlanner::default();

        let mut large = descriptor(0.8, 150, 0.9);
        large.domains.insert(DomainTag::Security);
        assert_eq!(planner.select_strategy(&large), WaveStrategy::Enterprise);

        let mut budget = descriptor(0.8, 30, 0.1);
        budget.args.insert("token_budget".into(), serde_json::json!(500_000));
        assert_eq!(planner.select_strategy(&budget), WaveStrategy::Enterprise);

        let mut risky = descriptor(0.8, 30, 0.75);
        assert_eq!(planner.select_strategy(&risky), WaveStrategy::Adaptive);
        risky.domains.insert(DomainTag::Bridge);
        assert_eq!(planner.select_strategy(&risky), WaveStrategy::Systematic);

        let mut optimize = descriptor(0.8, 30, 0.2);
        optimize.operations.insert(OperationTag::Optimize);
        assert_eq!(planner.select_strategy(&optimize), WaveStrategy::Progressive);
        optimize.risk_score = 0.5;
        assert_eq!(planner.select_strategy(&optimize), WaveStrategy::Adaptive);
    }

    #[test]
    fn test_canonical_chain_and_checkpoints() {
        let plan = WavePlanner::default().plan(&descriptor(0.8, 30, 0.3));
        assert_eq!(plan.strategy, WaveStrategy::Adaptive);
        assert_eq!(plan.stages(), Stage::CANONICAL.to_vec());

        assert!(plan.waves[0].dependencies.is_empty());
        for pair in plan.waves.windows(2) {
            assert_eq!(pair[1].dependencies, vec![pair[0].id.clone()]);
        }
        let expected: BTreeSet<String> = ["wave-4".to_string()].into_iter().collect();
        assert_eq!(plan.checkpoints, expected);
        assert!(!plan.waves[0].requires_validation);
        assert!(plan.waves[2].requires_validation);
    }

    #[test]
    fn test_systematic_adds_review_and_risk_checkpoints() {
        let mut d = descriptor(0.8, 30, 0.75);
        d.domains.insert(DomainTag::Security);
        let plan = WavePlanner::default().plan(&d);

        assert_eq!(plan.strategy, WaveStrategy::Systematic);
        assert_eq!(plan.waves.last().map(|w| w.stage), Some(Stage::Review));
        // implementation risk 0.85 and validation both checkpoint
        assert!(plan.is_checkpoint("wave-3"));
        assert!(plan.is_checkpoint("wave-4"));
        assert!(!plan.is_checkpoint("wave-1"));
        assert_eq!(plan.waves[4].tasks[0].worker, "security_agent");
    }

    #[test]
    fn test_enterprise_batches() {
        let plan = WavePlanner::default().plan(&descriptor(0.8, 250, 0.3));
        assert_eq!(plan.strategy, WaveStrategy::Enterprise);
        let implementation = plan
            .waves
            .iter()
            .filter(|w| w.stage == Stage::Implementation)
            .count();
        assert_eq!(implementation, 3);
        assert_eq!(plan.waves.last().map(|w| w.stage), Some(Stage::Consolidation));

        let huge = WavePlanner::default().plan(&descriptor(0.8, 10_000, 0.3));
        assert_eq!(huge.waves.len(), 2 + MAX_IMPLEMENTATION_BATCHES + 2);
    }

    #[test]
    fn test_estimates_are_monotonic() {
        let mut last = 0;
        for scope in [21, 50, 99, 101, 250, 1_000] {
            let plan = WavePlanner::default().plan(&descriptor(0.8, scope, 0.3));
            assert!(plan.estimated_tokens >= last);
            last = plan.estimated_tokens;
        }
        assert!(
            WavePlanner::estimate_duration_ms(40, 0.9, 4)
                >= WavePlanner::estimate_duration_ms(40, 0.7, 4)
        );
        assert!(
            WavePlanner::estimate_tokens(40, 0.9, 4) >= WavePlanner::estimate_tokens(40, 0.7, 4)
        );
    }
}
