//! Wave executor backed by worker fan-out

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::agents::{DataBridge, FanOut, WorkerContext};
use crate::domain::ToolArgs;
use crate::error::{Result, SextantError};
use crate::scheduler::RoutingDecision;
use crate::waves::{Wave, WaveExecutor, WaveMetrics, WavePlan, WaveResult};

/// Runs each wave's tasks through a [`FanOut`], in the routing decision's
/// dependency order and concurrently only when the routing allows it. Later
/// waves see the outputs of earlier ones as upstream data; a rolled-back
/// wave's outputs are withdrawn.
pub struct FanOutExecutor {
    fanout: Arc<FanOut>,
    request_id: String,
    args: ToolArgs,
    order: Vec<String>,
    parallel: bool,
    fallbacks: BTreeMap<String, Vec<String>>,
    bridge: Option<Arc<dyn DataBridge>>,
    staged: Mutex<BTreeMap<String, Map<String, Value>>>,
}

impl FanOutExecutor {
    pub fn new(
        fanout: Arc<FanOut>,
        request_id: impl Into<String>,
        args: ToolArgs,
        routing: &RoutingDecision,
    ) -> Self {
        Self {
            fanout,
            request_id: request_id.into(),
            args,
            order: routing.ordered_workers.clone(),
            parallel: routing.parallel_allowed,
            fallbacks: routing.fallback_workers.clone(),
            bridge: None,
            staged: Mutex::new(BTreeMap::new()),
        }
    }

    /// Bridge for this request's workers; the fan-out default otherwise
    pub fn with_bridge(mut self, bridge: Arc<dyn DataBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// A wave's workers in routing order; workers the routing never saw go last
    fn ordered(&self, wave: &Wave) -> Vec<String> {
        let mut workers: Vec<String> = wave.workers().into_iter().map(str::to_string).collect();
        workers.sort_by_key(|w| {
            self.order
                .iter()
                .position(|o| o == w)
                .unwrap_or(self.order.len())
        });
        workers
    }

    fn upstream(&self) -> Map<String, Value> {
        let staged = self.staged.lock().unwrap_or_else(|e| e.into_inner());
        let mut merged = Map::new();
        for outputs in staged.values() {
            for (key, value) in outputs {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }

    /// Wave ids whose outputs are currently staged
    pub fn staged_waves(&self) -> Vec<String> {
        let staged = self.staged.lock().unwrap_or_else(|e| e.into_inner());
        staged.keys().cloned().collect()
    }
}

#[async_trait]
impl WaveExecutor for FanOutExecutor {
    async fn execute(
        &self,
        plan: &WavePlan,
        wave: &Wave,
        cancel: &CancellationToken,
    ) -> Result<WaveResult> {
        let workers = self.ordered(wave);
        let mut ctx = WorkerContext::new(&self.request_id, &plan.tool_id, self.args.clone())
            .with_cancel(cancel.clone());
        ctx.upstream = self.upstream();
        ctx.bridge = self.bridge.clone();

        let report = self
            .fanout
            .run(&workers, &self.fallbacks, self.parallel, &ctx)
            .await;
        if cancel.is_cancelled() {
            return Err(SextantError::Cancelled);
        }

        let outputs = report.outputs();
        self.staged
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(wave.id.clone(), outputs.clone());
        debug!(
            plan = %plan.id,
            wave = %wave.id,
            workers = workers.len(),
            parallel = self.parallel,
            failures = report.failures.len(),
            "wave tasks finished"
        );

        Ok(WaveResult {
            wave_id: wave.id.clone(),
            success: report.is_complete(),
            outputs,
            metrics: WaveMetrics {
                duration_ms: report.duration_ms,
                tokens_used: report.tokens_used(),
                tools_used: workers,
                errors_encountered: report.failures.len() as u32,
            },
            evidence: json!({
                "stage": wave.stage,
                "failures": report.failures,
            }),
        })
    }

    async fn rollback(&self, _plan: &WavePlan, wave: &Wave) -> Result<()> {
        self.staged
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&wave.id);
        Ok(())
    }
}
