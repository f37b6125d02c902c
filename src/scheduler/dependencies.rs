//! Worker dependency and fallback tables
//!
//! "A depends on B" means B must run before A. Ordering only considers edges
//! between workers that were actually selected for a request.

use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, Default)]
pub struct WorkerGraph {
    dependencies: HashMap<String, Vec<String>>,
    fallbacks: HashMap<String, Vec<String>>,
}

impl WorkerGraph {
    /// Empty graph: no dependencies, no fallbacks
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in tables for the bundled workers
    pub fn standard() -> Self {
        Self::new()
            .with_dependency("alpha_agent", "market_agent")
            .with_dependency("alpha_agent", "sentiment_agent")
            .with_dependency("portfolio_agent", "market_agent")
            .with_dependency("risk_agent", "security_agent")
            .with_dependency("risk_agent", "onchain_agent")
            .with_dependency("bridge_agent", "onchain_agent")
            .with_dependency("whale_agent", "onchain_agent")
            .with_dependency("defi_agent", "market_agent")
            .with_fallback("security_agent", "onchain_agent")
            .with_fallback("sentiment_agent", "market_agent")
            .with_fallback("alpha_agent", "market_agent")
            .with_fallback("whale_agent", "onchain_agent")
    }

    /// Declare that `worker` must run after `depends_on`
    pub fn with_dependency(mut self, worker: &str, depends_on: &str) -> Self {
        let deps = self.dependencies.entry(worker.to_string()).or_default();
        if !deps.iter().any(|d| d == depends_on) {
            deps.push(depends_on.to_string());
        }
        self
    }

    pub fn with_fallback(mut self, worker: &str, fallback: &str) -> Self {
        let fbs = self.fallbacks.entry(worker.to_string()).or_default();
        if !fbs.iter().any(|f| f == fallback) {
            fbs.push(fallback.to_string());
        }
        self
    }

    pub fn dependencies_of(&self, worker: &str) -> &[String] {
        self.dependencies
            .get(worker)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn fallbacks_of(&self, worker: &str) -> &[String] {
        self.fallbacks.get(worker).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of dependency edges among `workers`
    pub fn edge_count(&self, workers: &[String]) -> usize {
        let selected: HashSet<&str> = workers.iter().map(String::as_str).collect();
        selected
            .iter()
            .map(|w| {
                self.dependencies_of(w)
                    .iter()
                    .filter(|d| d.as_str() != *w && selected.contains(d.as_str()))
                    .count()
            })
            .sum()
    }

    /// Kahn's algorithm over the selected workers.
    ///
    /// Zero in-degree workers are released in input order. Workers left over
    /// because of a cycle are appended in input order; cycles never fail.
    pub fn order(&self, workers: &[String]) -> Vec<String> {
        let mut unique: Vec<&str> = Vec::with_capacity(workers.len());
        for worker in workers {
            if !unique.contains(&worker.as_str()) {
                unique.push(worker.as_str());
            }
        }

        let position: HashMap<&str, usize> =
            unique.iter().enumerate().map(|(i, w)| (*w, i)).collect();
        let mut in_degree = vec![0usize; unique.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); unique.len()];

        for (idx, worker) in unique.iter().enumerate() {
            for dep in self.dependencies_of(worker) {
                if let Some(&dep_idx) = position.get(dep.as_str()) {
                    if dep_idx != idx {
                        in_degree[idx] += 1;
                        dependents[dep_idx].push(idx);
                    }
                }
            }
        }

        let mut queue: VecDeque<usize> = (0..unique.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut placed = vec![false; unique.len()];
        let mut sorted = Vec::with_capacity(unique.len());

        while let Some(idx) = queue.pop_front() {
            placed[idx] = true;
            sorted.push(unique[idx].to_string());

            let mut released: Vec<usize> = Vec::new();
            for &next in &dependents[idx] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    released.push(next);
                }
            }
            released.sort_unstable();
            queue.extend(released);
        }

        if sorted.len() < unique.len() {
            for (idx, worker) in unique.iter().enumerate() {
                if !placed[idx] {
                    sorted.push(worker.to_string());
                }
            }
        }

        sorted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn index(order: &[String], name: &str) -> usize {
        order.iter().position(|w| w == name).unwrap()
    }

    #[test]
    fn test_order_respects_dependencies() {
        let graph = WorkerGraph::standard();
        let order = graph.order(&names(&[
            "alpha_agent",
            "sentiment_agent",
            "market_agent",
            "risk_agent",
            "security_agent",
        ]));

        assert_eq!(order.len(), 5);
        assert!(index(&order, "market_agent") < index(&order, "alpha_agent"));
        assert!(index(&order, "sentiment_agent") < index(&order, "alpha_agent"));
        assert!(index(&order, "security_agent") < index(&order, "risk_agent"));
    }

    #[test]
    fn test_independent_workers_keep_input_order() {
        let graph = WorkerGraph::standard();
        let input = names(&["nft_agent", "security_agent", "market_agent"]);
        assert_eq!(graph.order(&input), input);
        assert_eq!(graph.edge_count(&input), 0);
    }

    #[test]
    fn test_cycle_members_appended_in_input_order() {
        let graph = WorkerGraph::new()
            .with_dependency("a", "b")
            .with_dependency("b", "a");
        let order = graph.order(&names(&["c", "b", "a"]));
        assert_eq!(order, names(&["c", "b", "a"]));
    }

    #[test]
    fn test_cycle_downstream_is_also_appended() {
        let graph = WorkerGraph::new()
            .with_dependency("a", "b")
            .with_dependency("b", "a")
            .with_dependency("d", "a");
        let order = graph.order(&names(&["d", "a", "b", "e"]));
        assert_eq!(order, names(&["e", "d", "a", "b"]));
    }

    #[test]
    fn test_self_dependency_and_duplicates_ignored() {
        let graph = WorkerGraph::new().with_dependency("a", "a");
        let order = graph.order(&names(&["a", "b", "a"]));
        assert_eq!(order, names(&["a", "b"]));
        assert_eq!(graph.edge_count(&names(&["a"])), 0);
    }

    #[test]
    fn test_fallbacks() {
        let graph = WorkerGraph::standard();
        assert_eq!(graph.fallbacks_of("security_agent"), &["onchain_agent".to_string()]);
        assert!(graph.fallbacks_of("nft_agent").is_empty());
    }
}
