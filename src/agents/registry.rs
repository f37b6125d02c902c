use std::collections::BTreeMap;
use std::sync::Arc;

use super::worker::{BridgeWorker, WorkerAgent};
use crate::error::{Result, SextantError};

/// Bundled worker ids and display names
pub const STANDARD_WORKERS: [(&str, &str); 12] = [
    ("market_agent", "Market Analyst"),
    ("security_agent", "Security Auditor"),
    ("bridge_agent", "Bridge Monitor"),
    ("alpha_agent", "Alpha Hunter"),
    ("whale_agent", "Whale Tracker"),
    ("defi_agent", "DeFi Analyst"),
    ("sentiment_agent", "Sentiment Analyst"),
    ("portfolio_agent", "Portfolio Manager"),
    ("nft_agent", "NFT Analyst"),
    ("risk_agent", "Risk Assessor"),
    ("execution_agent", "Trade Executor"),
    ("onchain_agent", "On-chain Analyst"),
];

/// Worker lookup by id
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    workers: BTreeMap<String, Arc<dyn WorkerAgent>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every bundled worker, each backed by the bridge tool of the same id
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for (id, name) in STANDARD_WORKERS {
            registry.register(Arc::new(BridgeWorker::new(id, name, id)));
        }
        registry
    }

    /// Register a worker, returning the one it replaced
    pub fn register(&mut self, worker: Arc<dyn WorkerAgent>) -> Option<Arc<dyn WorkerAgent>> {
        self.workers.insert(worker.id().to_string(), worker)
    }

    pub fn with(mut self, worker: Arc<dyn WorkerAgent>) -> Self {
        self.register(worker);
        self
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn WorkerAgent>> {
        self.workers
            .get(id)
            .cloned()
            .ok_or_else(|| SextantError::WorkerNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.workers.contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.workers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry() {
        let registry = WorkerRegistry::standard();
        assert_eq!(registry.len(), STANDARD_WORKERS.len());
        assert!(registry.contains("security_agent"));
        assert_eq!(
            registry.get("whale_agent").map(|w| w.name().to_string()).ok(),
            Some("Whale Tracker".to_string())
        );
        assert!(matches!(
            registry.get("ghost_agent"),
            Err(SextantError::WorkerNotFound(id)) if id == "ghost_agent"
        ));
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = WorkerRegistry::new();
        assert!(registry.register(Arc::new(BridgeWorker::new("a", "A", "x"))).is_none());
        let replaced = registry.register(Arc::new(BridgeWorker::new("a", "A2", "y")));
        assert_eq!(replaced.map(|w| w.name().to_string()), Some("A".to_string()));
        assert_eq!(registry.ids(), vec!["a".to_string()]);
    }
}
