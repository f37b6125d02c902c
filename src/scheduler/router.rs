//! Routing decisions for classified requests

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::debug;

use super::dependencies::WorkerGraph;
use crate::domain::{ComplexityLevel, DomainTag, OperationTag, Priority, RequestDescriptor};

/// Estimated duration above which an unflagged request is deprioritized
const SLOW_REQUEST_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// One worker, run directly
    Simple,
    /// Fan out to every worker at once
    Parallel,
    /// One worker after another in dependency order
    Sequential,
    /// Dependency levels run in order, independent workers together
    Hybrid,
}

impl ExecutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStrategy::Simple => "simple",
            ExecutionStrategy::Parallel => "parallel",
            ExecutionStrategy::Sequential => "sequential",
            ExecutionStrategy::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStrategy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(ExecutionStrategy::Simple),
            "parallel" => Ok(ExecutionStrategy::Parallel),
            "sequential" => Ok(ExecutionStrategy::Sequential),
            "hybrid" => Ok(ExecutionStrategy::Hybrid),
            _ => Err(format!(
                "invalid strategy '{raw}'; expected simple|parallel|sequential|hybrid"
            )),
        }
    }
}

/// Per-tool routing overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolRoute {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ExecutionStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub tools: BTreeMap<String, ToolRoute>,
}

impl SchedulerConfig {
    /// Overrides for the bundled tool catalog
    pub fn standard() -> Self {
        let mut tools = BTreeMap::new();
        tools.insert(
            "market_overview".to_string(),
            ToolRoute {
                strategy: Some(ExecutionStrategy::Parallel),
                priority: None,
            },
        );
        tools.insert(
            "trade_executor".to_string(),
            ToolRoute {
                strategy: Some(ExecutionStrategy::Sequential),
                priority: Some(Priority::High),
            },
        );
        tools.insert(
            "market_report".to_string(),
            ToolRoute {
                strategy: None,
                priority: Some(Priority::Low),
            },
        );
        Self { tools }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub ordered_workers: Vec<String>,
    pub strategy: ExecutionStrategy,
    pub priority: Priority,
    /// Alternates per primary worker. The scheduler never invokes them.
    pub fallback_workers: BTreeMap<String, Vec<String>>,
    pub parallel_allowed: bool,
    pub cache_enabled: bool,
    pub requires_validation: bool,
}

pub struct Scheduler {
    config: SchedulerConfig,
    graph: WorkerGraph,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::standard(), WorkerGraph::standard())
    }
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, graph: WorkerGraph) -> Self {
        Self { config, graph }
    }

    pub fn graph(&self) -> &WorkerGraph {
        &self.graph
    }

    pub fn route(&self, descriptor: &RequestDescriptor) -> RoutingDecision {
        let ordered_workers = self.graph.order(&descriptor.suggested_workers);
        let tool_route = self.config.tools.get(&descriptor.tool_id);

        let strategy = self.select_strategy(descriptor, ordered_workers.len(), tool_route);
        let priority = self.select_priority(descriptor, tool_route);

        let has_edges = self.graph.edge_count(&ordered_workers) > 0;
        let parallel_allowed = !has_edges
            && descriptor.parallel_eligible
            && !matches!(
                strategy,
                ExecutionStrategy::Simple | ExecutionStrategy::Sequential
            );

        let fallback_workers = ordered_workers
            .iter()
            .filter_map(|w| {
                let fbs = self.graph.fallbacks_of(w);
                (!fbs.is_empty()).then(|| (w.clone(), fbs.to_vec()))
            })
            .collect();

        let cache_enabled =
            !descriptor.realtime && !descriptor.has_operation(OperationTag::Monitor);
        let requires_validation =
            descriptor.complexity_level != ComplexityLevel::Simple || descriptor.risk_score >= 0.5;

        debug!(
            tool = %descriptor.tool_id,
            strategy = %strategy,
            priority = %priority,
            workers = ?ordered_workers,
            parallel_allowed,
            "routed"
        );

        RoutingDecision {
            ordered_workers,
            strategy,
            priority,
            fallback_workers,
            parallel_allowed,
            cache_enabled,
            requires_validation,
        }
    }

    fn select_strategy(
        &self,
        descriptor: &RequestDescriptor,
        worker_count: usize,
        tool_route: Option<&ToolRoute>,
    ) -> ExecutionStrategy {
        if worker_count <= 1 {
            return ExecutionStrategy::Simple;
        }
        if let Some(strategy) = tool_route.and_then(|r| r.strategy) {
            return strategy;
        }
        match descriptor.complexity_level {
            ComplexityLevel::Simple => ExecutionStrategy::Parallel,
            ComplexityLevel::Complex => ExecutionStrategy::Hybrid,
            ComplexityLevel::Moderate => ExecutionStrategy::Sequential,
        }
    }

    fn select_priority(
        &self,
        descriptor: &RequestDescriptor,
        tool_route: Option<&ToolRoute>,
    ) -> Priority {
        if let Some(priority) = tool_route.and_then(|r| r.priority) {
            return priority;
        }
        if descriptor.has_domain(DomainTag::Security) || descriptor.has_domain(DomainTag::Bridge) {
            Priority::High
        } else if descriptor.is_complex() {
            Priority::Normal
        } else if descriptor.resource_estimate.time_ms > SLOW_REQUEST_MS {
            Priority::Low
        } else {
            Priority::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ResourceEstimate, ToolArgs};
    use std::collections::BTreeSet;

    fn descriptor(tool: &str, complexity: f64, workers: &[&str]) -> RequestDescriptor {
        RequestDescriptor {
            tool_id: tool.into(),
            args: ToolArgs::new(),
            complexity_score: complexity,
            complexity_level: ComplexityLevel::from_score(complexity),
            domains: BTreeSet::new(),
            operations: BTreeSet::new(),
            confidence: 0.8,
            risk_score: 0.1,
            priority_score: 0.5,
            resource_estimate: ResourceEstimate::new(2_000, 2_000, 64),
            suggested_workers: workers.iter().map(|w| w.to_string()).collect(),
            wave_eligible: false,
            parallel_eligible: workers.len() > 1,
            scope_size: 1,
            realtime: false,
        }
    }

    #[test]
    fn test_single_worker_is_simple() {
        let scheduler = Scheduler::default();
        // tool override says parallel, a single worker still wins
        let decision = scheduler.route(&descriptor("market_overview", 0.9, &["market_agent"]));
        assert_eq!(decision.strategy, ExecutionStrategy::Simple);
        assert!(!decision.parallel_allowed);
    }

    #[test]
    fn test_strategy_by_complexity() {
        let scheduler = Scheduler::new(SchedulerConfig::default(), WorkerGraph::new());
        let workers = ["nft_agent", "whale_agent"];
        assert_eq!(
            scheduler.route(&descriptor("x", 0.1, &workers)).strategy,
            ExecutionStrategy::Parallel
        );
        assert_eq!(
            scheduler.route(&descriptor("x", 0.5, &workers)).strategy,
            ExecutionStrategy::Sequential
        );
        assert_eq!(
            scheduler.route(&descriptor("x", 0.8, &workers)).strategy,
            ExecutionStrategy::Hybrid
        );
    }

    #[test]
    fn test_tool_override() {
        let scheduler = Scheduler::default();
        let decision = scheduler.route(&descriptor(
            "trade_executor",
            0.1,
            &["execution_agent", "market_agent"],
        ));
        assert_eq!(decision.strategy, ExecutionStrategy::Sequential);
        assert_eq!(decision.priority, Priority::High);
        assert!(!decision.parallel_allowed);
    }

    #[test]
    fn test_parallel_requires_no_edges() {
        let scheduler = Scheduler::default();
        let independent = scheduler.route(&descriptor("x", 0.1, &["nft_agent", "security_agent"]));
        assert!(independent.parallel_allowed);

        let dependent = scheduler.route(&descriptor("x", 0.1, &["alpha_agent", "market_agent"]));
        assert_eq!(dependent.ordered_workers, vec!["market_agent", "alpha_agent"]);
        assert!(!dependent.parallel_allowed);
        assert_eq!(
            dependent.fallback_workers.get("alpha_agent"),
            Some(&vec!["market_agent".to_string()])
        );
    }

    #[test]
    fn test_priority_rules() {
        let scheduler = Scheduler::new(SchedulerConfig::default(), WorkerGraph::new());

        let mut security = descriptor("x", 0.8, &["security_agent"]);
        security.domains.insert(DomainTag::Security);
        assert_eq!(scheduler.route(&security).priority, Priority::High);

        assert_eq!(
            scheduler.route(&descriptor("x", 0.8, &["a"])).priority,
            Priority::Normal
        );

        let mut slow = descriptor("x", 0.5, &["a"]);
        slow.resource_estimate.time_ms = 45_000;
        assert_eq!(scheduler.route(&slow).priority, Priority::Low);
    }

    #[test]
    fn test_cache_and_validation_flags() {
        let scheduler = Scheduler::default();
        let mut live = descriptor("x", 0.1, &["a"]);
        live.realtime = true;
        let decision = scheduler.route(&live);
        assert!(!decision.cache_enabled);
        assert!(!decision.requires_validation);

        let mut risky = descriptor("x", 0.1, &["a"]);
        risky.risk_score = 0.6;
        let decision = scheduler.route(&risky);
        assert!(decision.cache_enabled);
        assert!(decision.requires_validation);
    }
}
