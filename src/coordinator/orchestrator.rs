//! Orchestrator: the request pipeline
//!
//! classify → admit → pre-flight gate → route → execute (wave plan or direct
//! fan-out) → post-flight gate → report usage.
//!
//! Refusals and failed validation are outcomes, not errors. Only a failed
//! wave plan or cancellation comes back as `Err`.

use serde_json::Map;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::executor::FanOutExecutor;
use super::outcome::{
    OrchestrationOutcome, OrchestratorStats, OutcomeStatus, PlanSummary, StatsCounters,
};
use crate::agents::{CachedBridge, DataBridge, FanOut, WorkerContext, WorkerRegistry};
use crate::classifier::Classifier;
use crate::config::AppConfig;
use crate::domain::{RequestDescriptor, ToolArgs};
use crate::error::{Result, SextantError};
use crate::governor::{ResourceGovernor, Zone};
use crate::quality::{QualityGate, ValidationContext, ValidationResult};
use crate::scheduler::{RoutingDecision, Scheduler, WorkerGraph};
use crate::waves::{GateValidator, WaveConfig, WaveEngine, WaveEvent, WavePlan, WavePlanner};

pub struct Orchestrator {
    classifier: Arc<Classifier>,
    governor: Arc<ResourceGovernor>,
    scheduler: Scheduler,
    planner: WavePlanner,
    wave_config: WaveConfig,
    gate: Arc<QualityGate>,
    fanout: Arc<FanOut>,
    live_bridge: Arc<dyn DataBridge>,
    cached_bridge: Arc<CachedBridge>,
    wave_events: broadcast::Sender<WaveEvent>,
    stats: StatsCounters,
}

impl Orchestrator {
    pub fn new(
        config: &AppConfig,
        governor: Arc<ResourceGovernor>,
        registry: Arc<WorkerRegistry>,
        bridge: Arc<dyn DataBridge>,
    ) -> Result<Self> {
        Self::build(config, governor, registry, bridge, None)
    }

    /// Like [`Orchestrator::new`], with a second bridge tried when the primary fails
    pub fn with_fallback_bridge(
        config: &AppConfig,
        governor: Arc<ResourceGovernor>,
        registry: Arc<WorkerRegistry>,
        bridge: Arc<dyn DataBridge>,
        fallback: Arc<dyn DataBridge>,
    ) -> Result<Self> {
        Self::build(config, governor, registry, bridge, Some(fallback))
    }

    fn build(
        config: &AppConfig,
        governor: Arc<ResourceGovernor>,
        registry: Arc<WorkerRegistry>,
        bridge: Arc<dyn DataBridge>,
        fallback: Option<Arc<dyn DataBridge>>,
    ) -> Result<Self> {
        let settings = &config.orchestrator;
        let classifier = Arc::new(Classifier::new(config.classifier.clone()));
        let gate =
            Arc::new(QualityGate::new(config.quality.clone())?.with_governor(governor.clone()));

        let mut cached = CachedBridge::new(
            bridge.clone(),
            Duration::from_secs(settings.bridge_cache_ttl_secs),
        )
        .with_stale_window(Duration::from_secs(settings.bridge_stale_secs));
        if let Some(fallback) = fallback {
            cached = cached.with_fallback(fallback);
        }
        let cached_bridge = Arc::new(cached);

        let mut fanout = FanOut::new(registry).with_bridge(cached_bridge.clone());
        if settings.worker_timeout_ms > 0 {
            fanout =
                fanout.with_worker_timeout(Duration::from_millis(settings.worker_timeout_ms));
        }

        register_pressure_hooks(&governor, &classifier, &gate, &cached_bridge);

        let (wave_events, _) = broadcast::channel(256);
        Ok(Self {
            classifier,
            governor,
            scheduler: Scheduler::new(config.scheduler.clone(), WorkerGraph::standard()),
            planner: WavePlanner::new(config.waves.clone()),
            wave_config: config.waves.clone(),
            gate,
            fanout: Arc::new(fanout),
            live_bridge: bridge,
            cached_bridge,
            wave_events,
            stats: StatsCounters::default(),
        })
    }

    /// System-probed governor and the bundled workers
    pub fn from_config(config: &AppConfig, bridge: Arc<dyn DataBridge>) -> Result<Self> {
        let governor = Arc::new(ResourceGovernor::new(config.governor.clone()));
        Self::new(config, governor, Arc::new(WorkerRegistry::standard()), bridge)
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn governor(&self) -> &Arc<ResourceGovernor> {
        &self.governor
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn planner(&self) -> &WavePlanner {
        &self.planner
    }

    pub fn gate(&self) -> &QualityGate {
        &self.gate
    }

    pub fn stats(&self) -> OrchestratorStats {
        self.stats.snapshot()
    }

    pub fn subscribe_waves(&self) -> broadcast::Receiver<WaveEvent> {
        self.wave_events.subscribe()
    }

    /// Start the governor's monitoring loop at the configured interval
    pub fn start(&self) -> bool {
        let interval = self.governor.config().sample_interval();
        self.governor.start_monitoring(interval)
    }

    pub fn shutdown(&self) {
        self.governor.stop();
    }

    /// Classify and route without executing
    pub fn route(&self, tool_id: &str, args: &ToolArgs) -> (RequestDescriptor, RoutingDecision) {
        let descriptor = self.classifier.classify(tool_id, args);
        let decision = self.scheduler.route(&descriptor);
        (descriptor, decision)
    }

    /// Wave plan for a request, if it warrants one
    pub fn plan(&self, tool_id: &str, args: &ToolArgs) -> Option<WavePlan> {
        let descriptor = self.classifier.classify(tool_id, args);
        self.planner
            .should_plan(&descriptor)
            .then(|| self.planner.plan(&descriptor))
    }

    pub async fn handle(
        &self,
        tool_id: &str,
        args: ToolArgs,
        context: &ValidationContext,
        cancel: &CancellationToken,
    ) -> Result<OrchestrationOutcome> {
        let started = Instant::now();
        self.stats.request();

        let request_id = Uuid::new_v4().to_string();
        let descriptor = self.classifier.classify(tool_id, &args);
        let admission = self.governor.admit(&descriptor);

        let mut outcome = OrchestrationOutcome {
            request_id: request_id.clone(),
            status: OutcomeStatus::Completed,
            reason: None,
            descriptor: descriptor.clone(),
            admission: admission.clone(),
            routing: None,
            preflight: None,
            postflight: None,
            plan: None,
            outputs: Map::new(),
            failures: Vec::new(),
            tokens_used: 0,
            duration_ms: 0,
        };

        if !admission.allowed {
            debug!(
                request = %request_id,
                tool = %tool_id,
                zone = %admission.zone,
                "request refused by governor"
            );
            outcome.status = OutcomeStatus::Rejected;
            outcome.reason = admission.reason;
            return Ok(self.finish(outcome, started));
        }

        let preflight = self.gate.validate_request(&descriptor, context);
        let preflight_passed = preflight.passed;
        let preflight_reason = summarize(&preflight);
        outcome.preflight = Some(preflight);
        if !preflight_passed {
            outcome.status = OutcomeStatus::ValidationFailed;
            outcome.reason = Some(format!("pre-flight: {preflight_reason}"));
            return Ok(self.finish(outcome, started));
        }

        let routing = self.scheduler.route(&descriptor);
        let bridge: Arc<dyn DataBridge> = if routing.cache_enabled {
            self.cached_bridge.clone()
        } else {
            self.live_bridge.clone()
        };

        if self.planner.should_plan(&descriptor) {
            self.stats.wave_plan();
            let mut plan = self.planner.plan(&descriptor);
            let executor = FanOutExecutor::new(
                self.fanout.clone(),
                &request_id,
                args.clone(),
                &routing,
            )
            .with_bridge(bridge);
            let engine = WaveEngine::new(self.wave_config.clone(), Arc::new(executor))
                .with_governor(self.governor.clone())
                .with_validator(Arc::new(GateValidator::new(
                    self.gate.clone(),
                    args.clone(),
                    context.clone(),
                )))
                .with_event_sender(self.wave_events.clone());

            let plan_outcome = match engine.execute(&mut plan, &descriptor, cancel).await {
                Ok(plan_outcome) => plan_outcome,
                Err(err) => {
                    if cancel.is_cancelled() {
                        self.stats.cancelled();
                    } else {
                        self.stats.plan_failure();
                    }
                    warn!(
                        request = %request_id,
                        tool = %tool_id,
                        error = %err,
                        "wave plan aborted"
                    );
                    return Err(err);
                }
            };
            outcome.tokens_used = plan_outcome.tokens_used;
            outcome.plan = Some(PlanSummary::from(&plan_outcome));
            outcome.outputs = plan_outcome.outputs;
        } else {
            let ctx = WorkerContext::new(&request_id, tool_id, args.clone())
                .with_bridge(bridge)
                .with_cancel(cancel.clone());
            let report = self.fanout.run_routed(&routing, &ctx).await;
            if cancel.is_cancelled() {
                self.stats.cancelled();
                return Err(SextantError::Cancelled);
            }

            // workers that report no usage are charged the estimate
            let tokens = match report.tokens_used() {
                0 => descriptor.resource_estimate.tokens,
                used => used,
            };
            self.governor.report_usage(tokens, report.duration_ms);
            outcome.tokens_used = tokens;
            outcome.outputs = report.outputs();
            outcome.failures = report.failures;
        }

        if !outcome.failures.is_empty() {
            outcome.status = OutcomeStatus::Partial;
        }

        if outcome.outputs.is_empty() {
            outcome.status = OutcomeStatus::Partial;
            outcome.reason = Some("no worker produced output".to_string());
        } else if routing.requires_validation {
            let postflight = self
                .gate
                .validate_outputs(tool_id, &args, &outcome.outputs, context);
            if !postflight.passed {
                outcome.status = OutcomeStatus::ValidationFailed;
                outcome.reason = Some(format!("post-flight: {}", summarize(&postflight)));
            }
            outcome.postflight = Some(postflight);
        }

        outcome.routing = Some(routing);
        Ok(self.finish(outcome, started))
    }

    fn finish(&self, mut outcome: OrchestrationOutcome, started: Instant) -> OrchestrationOutcome {
        outcome.duration_ms = started.elapsed().as_millis() as u64;
        self.stats.outcome(outcome.status);
        info!(
            request = %outcome.request_id,
            tool = %outcome.descriptor.tool_id,
            status = %outcome.status,
            outputs = outcome.outputs.len(),
            failures = outcome.failures.len(),
            duration_ms = outcome.duration_ms,
            "request handled"
        );
        outcome
    }
}

fn summarize(result: &ValidationResult) -> String {
    let issues = result.issues();
    if !issues.is_empty() {
        return issues.join("; ");
    }
    let failed: Vec<String> = result.failed_steps().iter().map(ToString::to_string).collect();
    if failed.is_empty() {
        format!("context retention {:.0}", result.context_retention)
    } else {
        format!("failed steps: {}", failed.join(", "))
    }
}

/// Shed cache memory as pressure rises. Hooks hold weak references so the
/// governor does not keep the pipeline alive.
fn register_pressure_hooks(
    governor: &ResourceGovernor,
    classifier: &Arc<Classifier>,
    gate: &Arc<QualityGate>,
    bridge: &Arc<CachedBridge>,
) {
    let classifier = Arc::downgrade(classifier);
    let bridge = Arc::downgrade(bridge);
    governor.register_zone_hook_at_or_above(Zone::Orange, "compact-caches", move |entry| {
        let compacted = classifier.upgrade().map(|c| c.compact_cache()).unwrap_or(0);
        let purged = bridge.upgrade().map(|b| b.purge_expired()).unwrap_or(0);
        info!(zone = %entry.zone, compacted, purged, "compacted caches under pressure");
    });

    let gate = Arc::downgrade(gate);
    governor.register_zone_hook_at_or_above(Zone::Red, "purge-quality-cache", move |entry| {
        if let Some(gate) = gate.upgrade() {
            let cleared = gate.clear_cache();
            warn!(zone = %entry.zone, cleared, "purged quality gate cache");
        }
    });
}
