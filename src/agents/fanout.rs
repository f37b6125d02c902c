//! Worker fan-out
//!
//! Runs an ordered worker list either concurrently or one after another.
//! A failing worker never aborts its siblings: its registered fallbacks are
//! tried in order and, if all fail, the failure is reported alongside the
//! successes.

use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::bridge::DataBridge;
use super::registry::WorkerRegistry;
use super::worker::{WorkerContext, WorkerResponse};
use crate::scheduler::RoutingDecision;

/// Metadata key naming the primary worker a fallback stood in for
pub const FALLBACK_FOR: &str = "fallback_for";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerFailure {
    pub worker: String,
    pub errors: Vec<String>,
    pub fallbacks_tried: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FanOutReport {
    pub successes: Vec<WorkerResponse>,
    pub failures: Vec<WorkerFailure>,
    pub duration_ms: u64,
}

impl FanOutReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Successful outputs keyed by the worker they were requested from
    pub fn outputs(&self) -> Map<String, Value> {
        self.successes
            .iter()
            .map(|r| (requested_worker(r).to_string(), r.data.clone()))
            .collect()
    }

    pub fn tokens_used(&self) -> u64 {
        self.successes.iter().map(WorkerResponse::tokens_used).sum()
    }
}

fn requested_worker(response: &WorkerResponse) -> &str {
    response
        .metadata
        .get(FALLBACK_FOR)
        .and_then(Value::as_str)
        .unwrap_or(&response.agent)
}

pub struct FanOut {
    registry: Arc<WorkerRegistry>,
    bridge: Option<Arc<dyn DataBridge>>,
    worker_timeout: Option<Duration>,
}

impl FanOut {
    pub fn new(registry: Arc<WorkerRegistry>) -> Self {
        Self {
            registry,
            bridge: None,
            worker_timeout: None,
        }
    }

    /// Bridge handed to workers whose context has none
    pub fn with_bridge(mut self, bridge: Arc<dyn DataBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Per-attempt time limit; an overrunning worker has its token cancelled
    pub fn with_worker_timeout(mut self, timeout: Duration) -> Self {
        self.worker_timeout = Some(timeout);
        self
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// Run the workers of a routing decision
    pub async fn run_routed(
        &self,
        decision: &RoutingDecision,
        base: &WorkerContext,
    ) -> FanOutReport {
        self.run(
            &decision.ordered_workers,
            &decision.fallback_workers,
            decision.parallel_allowed,
            base,
        )
        .await
    }

    pub async fn run(
        &self,
        workers: &[String],
        fallbacks: &BTreeMap<String, Vec<String>>,
        parallel: bool,
        base: &WorkerContext,
    ) -> FanOutReport {
        let started = Instant::now();
        let mut base = base.clone();
        if base.bridge.is_none() {
            base.bridge = self.bridge.clone();
        }
        let no_fallbacks = Vec::new();

        let mut report = FanOutReport::default();
        if parallel {
            let attempts = workers.iter().map(|worker| {
                let chain = fallbacks.get(worker).unwrap_or(&no_fallbacks);
                self.run_worker(worker, chain, base.clone())
            });
            for outcome in join_all(attempts).await {
                match outcome {
                    Ok(response) => report.successes.push(response),
                    Err(failure) => report.failures.push(failure),
                }
            }
        } else {
            let mut upstream = base.upstream.clone();
            for worker in workers {
                let chain = fallbacks.get(worker).unwrap_or(&no_fallbacks);
                let mut ctx = base.clone();
                ctx.upstream = upstream.clone();
                match self.run_worker(worker, chain, ctx).await {
                    Ok(response) => {
                        upstream.insert(worker.clone(), response.data.clone());
                        report.successes.push(response);
                    }
                    Err(failure) => report.failures.push(failure),
                }
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        debug!(
            request = %base.request_id,
            parallel,
            succeeded = report.successes.len(),
            failed = report.failures.len(),
            "fan-out finished"
        );
        report
    }

    /// Primary first, then each fallback until one succeeds
    async fn run_worker(
        &self,
        worker: &str,
        fallbacks: &[String],
        ctx: WorkerContext,
    ) -> std::result::Result<WorkerResponse, WorkerFailure> {
        let primary = self.invoke(worker, ctx.clone()).await;
        if primary.success {
            return Ok(primary);
        }

        let mut errors = primary.errors;
        let mut tried = Vec::new();
        for fallback in fallbacks {
            if ctx.cancel.is_cancelled() {
                break;
            }
            tried.push(fallback.clone());
            let response = self.invoke(fallback, ctx.clone()).await;
            if response.success {
                debug!(worker, fallback = %fallback, "fallback worker succeeded");
                return Ok(response.with_metadata(FALLBACK_FOR, Value::String(worker.to_string())));
            }
            errors.extend(response.errors);
        }

        warn!(worker, errors = ?errors, fallbacks = ?tried, "worker failed");
        Err(WorkerFailure {
            worker: worker.to_string(),
            errors,
            fallbacks_tried: tried,
        })
    }

    /// One attempt. Unknown workers, timeouts and panics become failed responses.
    async fn invoke(&self, worker_id: &str, mut ctx: WorkerContext) -> WorkerResponse {
        if ctx.cancel.is_cancelled() {
            return WorkerResponse::failed(worker_id, "cancelled");
        }
        let worker = match self.registry.get(worker_id) {
            Ok(worker) => worker,
            Err(err) => return WorkerResponse::failed(worker_id, err.to_string()),
        };

        let attempt_token = ctx.cancel.child_token();
        ctx.cancel = attempt_token.clone();
        let analysis = AssertUnwindSafe(worker.analyze(ctx)).catch_unwind();

        let outcome = match self.worker_timeout {
            Some(limit) => match tokio::time::timeout(limit, analysis).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    attempt_token.cancel();
                    return WorkerResponse::failed(
                        worker_id,
                        format!("timed out after {}ms", limit.as_millis()),
                    );
                }
            },
            None => analysis.await,
        };

        match outcome {
            Ok(response) => response,
            Err(_) => WorkerResponse::failed(worker_id, "worker panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{StaticBridge, WorkerAgent};
    use crate::domain::ToolArgs;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records the upstream keys it saw; fails or panics on request
    struct Scripted {
        id: &'static str,
        mode: &'static str,
        seen: Arc<Mutex<Vec<(String, Vec<String>)>>>,
    }

    #[async_trait]
    impl WorkerAgent for Scripted {
        fn id(&self) -> &str {
            self.id
        }

        async fn analyze(&self, ctx: WorkerContext) -> WorkerResponse {
            self.seen
                .lock()
                .unwrap()
                .push((self.id.to_string(), ctx.upstream.keys().cloned().collect()));
            match self.mode {
                "fail" => WorkerResponse::failed(self.id, format!("{} is down", self.id)),
                "panic" => panic!("boom"),
                "slow" => {
                    ctx.cancel.cancelled().await;
                    WorkerResponse::failed(self.id, "cancelled")
                }
                _ => WorkerResponse::ok(self.id, json!({ "from": self.id }))
                    .with_metadata("tokens_used", json!(10)),
            }
        }
    }

    type Seen = Arc<Mutex<Vec<(String, Vec<String>)>>>;

    fn registry(workers: &[(&'static str, &'static str)]) -> (Arc<WorkerRegistry>, Seen) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = WorkerRegistry::new();
        for &(id, mode) in workers {
            registry.register(Arc::new(Scripted { id, mode, seen: seen.clone() }));
        }
        (Arc::new(registry), seen)
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_parallel_isolates_failures() {
        let (registry, _) = registry(&[("a", "ok"), ("b", "fail"), ("c", "panic"), ("d", "ok")]);
        let fan = FanOut::new(registry);
        let ctx = WorkerContext::new("req", "tool", ToolArgs::new());

        let report = fan
            .run(&ids(&["a", "b", "c", "d", "ghost"]), &BTreeMap::new(), true, &ctx)
            .await;
        assert_eq!(report.successes.len(), 2);
        assert_eq!(report.failures.len(), 3);
        assert!(!report.is_complete());
        assert_eq!(report.tokens_used(), 20);

        let failed: Vec<&str> = report.failures.iter().map(|f| f.worker.as_str()).collect();
        assert_eq!(failed, vec!["b", "c", "ghost"]);
        assert_eq!(report.failures[1].errors, vec!["worker panicked".to_string()]);
        assert!(report.failures[2].errors[0].contains("not registered"));
    }

    #[tokio::test]
    async fn test_fallback_stands_in() {
        let (registry, _) =
            registry(&[("primary", "fail"), ("backup_down", "fail"), ("backup", "ok")]);
        let fan = FanOut::new(registry);
        let ctx = WorkerContext::new("req", "tool", ToolArgs::new());
        let mut fallbacks = BTreeMap::new();
        fallbacks.insert("primary".to_string(), ids(&["backup_down", "backup"]));

        let report = fan.run(&ids(&["primary"]), &fallbacks, false, &ctx).await;
        assert!(report.is_complete());
        assert_eq!(report.successes[0].agent, "backup");
        assert_eq!(report.outputs().get("primary"), Some(&json!({ "from": "backup" })));
    }

    #[tokio::test]
    async fn test_sequential_passes_upstream() {
        let (registry, seen) = registry(&[("first", "ok"), ("second", "ok")]);
        let fan = FanOut::new(registry);
        let ctx = WorkerContext::new("req", "tool", ToolArgs::new());

        fan.run(&ids(&["first", "second"]), &BTreeMap::new(), false, &ctx).await;
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], ("first".to_string(), vec![]));
        assert_eq!(seen[1], ("second".to_string(), vec!["first".to_string()]));
    }

    #[tokio::test]
    async fn test_timeout_cancels_attempt() {
        let (registry, _) = registry(&[("slow", "slow")]);
        let fan = FanOut::new(registry).with_worker_timeout(Duration::from_millis(20));
        let ctx = WorkerContext::new("req", "tool", ToolArgs::new());

        let report = fan.run(&ids(&["slow"]), &BTreeMap::new(), true, &ctx).await;
        assert_eq!(report.failures[0].errors, vec!["timed out after 20ms".to_string()]);
        assert!(!ctx.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_standard_workers_use_fan_out_bridge() {
        let fan = FanOut::new(Arc::new(WorkerRegistry::standard()))
            .with_bridge(Arc::new(StaticBridge::echo()));
        let ctx = WorkerContext::new("req", "token_price", ToolArgs::new());

        let report = fan
            .run(&ids(&["market_agent", "onchain_agent"]), &BTreeMap::new(), true, &ctx)
            .await;
        assert!(report.is_complete());
        assert_eq!(
            report.outputs().get("market_agent"),
            Some(&json!({ "tool": "market_agent", "args": {} }))
        );
    }
}
