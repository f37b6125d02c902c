//! Request Classifier
//!
//! Turns a `(tool_id, args)` pair into a [`RequestDescriptor`]. Never fails:
//! input that matches no rule yields a low-confidence default descriptor.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::debug;

use super::cache::MemoCache;
use super::rules::{
    default_rules, PatternRule, DEEP_FLAGS, FALLBACK_WORKER, HISTORY_FLAGS, LARGE_VALUE_USD,
    MAINNET_FLAGS, MULTI_CHAIN_FLAGS, REALTIME_FLAGS, VALUE_ARGS,
};
use crate::domain::{
    arg_f64, arg_flag, arg_str, scope_size, ComplexityLevel, DomainTag, OperationTag, Priority,
    RequestDescriptor, ResourceEstimate, ToolArgs,
};

const BASE_COMPLEXITY: f64 = 0.1;
const BASE_RISK: f64 = 0.1;
const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Classifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Max memoized descriptors (0 disables memoization)
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_cache_capacity() -> usize {
    512
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
        }
    }
}

/// Memo cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassifierStats {
    pub hits: u64,
    pub misses: u64,
    pub cached: usize,
}

pub struct Classifier {
    rules: Vec<PatternRule>,
    cache: Mutex<MemoCache<RequestDescriptor>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

impl Classifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self::with_rules(config, default_rules())
    }

    pub fn with_rules(config: ClassifierConfig, rules: Vec<PatternRule>) -> Self {
        Self {
            rules,
            cache: Mutex::new(MemoCache::new(config.cache_capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Classify a tool call. Memoized by content hash; the cache only saves
    /// work, the result is identical either way.
    pub fn classify(&self, tool_id: &str, args: &ToolArgs) -> RequestDescriptor {
        let key = crate::domain::request_key(tool_id, args);

        if let Some(hit) = self.lock_cache().get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return hit;
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let descriptor = self.classify_uncached(tool_id, args);
        debug!(
            tool = %tool_id,
            complexity = descriptor.complexity_score,
            level = %descriptor.complexity_level,
            domains = descriptor.domains.len(),
            wave_eligible = descriptor.wave_eligible,
            "classified request"
        );

        self.lock_cache().insert(key, descriptor.clone());
        descriptor
    }

    /// Pure classification without touching the memo cache
    pub fn classify_uncached(&self, tool_id: &str, args: &ToolArgs) -> RequestDescriptor {
        let blob = text_blob(tool_id, args);
        let matched: Vec<&PatternRule> = self.rules.iter().filter(|r| r.matches(&blob)).collect();

        let mut domains = BTreeSet::new();
        let mut operations = BTreeSet::new();
        let mut suggested_workers: Vec<String> = Vec::new();
        for rule in &matched {
            domains.extend(rule.domains.iter().copied());
            operations.extend(rule.operations.iter().copied());
            for worker in rule.workers {
                if !suggested_workers.iter().any(|w| w == worker) {
                    suggested_workers.push((*worker).to_string());
                }
            }
        }
        if suggested_workers.is_empty() {
            suggested_workers.push(FALLBACK_WORKER.to_string());
        }

        let realtime = arg_flag(args, REALTIME_FLAGS);
        let complexity_score = complexity_score(&matched, domains.len(), args, realtime);
        let complexity_level = ComplexityLevel::from_score(complexity_score);

        let confidence = if matched.is_empty() {
            DEFAULT_CONFIDENCE
        } else {
            matched.iter().map(|r| r.base_confidence).sum::<f64>() / matched.len() as f64
        };

        let risk_score = risk_score(&domains, &operations, args);
        let priority_score = priority_score(risk_score, realtime, &operations, args);
        let resource_estimate = resource_estimate(complexity_level, domains.len());

        let wave_eligible = complexity_score >= ComplexityLevel::COMPLEX_THRESHOLD
            || domains.len() > 2
            || operations.iter().any(OperationTag::is_complex);
        let parallel_eligible =
            suggested_workers.len() > 1 && !operations.contains(&OperationTag::Execute);

        RequestDescriptor {
            tool_id: tool_id.to_string(),
            args: args.clone(),
            complexity_score,
            complexity_level,
            domains,
            operations,
            confidence,
            risk_score,
            priority_score,
            resource_estimate,
            suggested_workers,
            wave_eligible,
            parallel_eligible,
            scope_size: scope_size(args),
            realtime,
        }
    }

    /// Drop the older half of the memo cache
    pub fn compact_cache(&self) -> usize {
        let dropped = self.lock_cache().compact();
        debug!(dropped, "compacted classifier cache");
        dropped
    }

    pub fn clear_cache(&self) {
        self.lock_cache().clear();
    }

    pub fn stats(&self) -> ClassifierStats {
        ClassifierStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            cached: self.lock_cache().len(),
        }
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, MemoCache<RequestDescriptor>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Lower-cased tool id plus every string-valued argument
fn text_blob(tool_id: &str, args: &ToolArgs) -> String {
    let mut blob = tool_id.to_lowercase();
    for value in args.values() {
        if let Some(s) = value.as_str() {
            blob.push(' ');
            blob.push_str(&s.to_lowercase());
        }
    }
    blob
}

fn complexity_score(
    matched: &[&PatternRule],
    domain_count: usize,
    args: &ToolArgs,
    realtime: bool,
) -> f64 {
    let mut score = BASE_COMPLEXITY
        + matched
            .iter()
            .map(|r| r.complexity_modifier * 0.2)
            .sum::<f64>();

    if domain_count > 2 {
        score += 0.2;
    }
    if domain_count > 3 {
        score += 0.15;
    }
    if args.len() > 5 {
        score += 0.1;
    }
    if args.len() > 10 {
        score += 0.15;
    }
    if arg_flag(args, DEEP_FLAGS) {
        score += 0.15;
    }
    if arg_flag(args, HISTORY_FLAGS) {
        score += 0.2;
    }
    let many_chains = args
        .get("chains")
        .and_then(|v| v.as_array())
        .map(|chains| chains.len() > 1)
        .unwrap_or(false);
    if arg_flag(args, MULTI_CHAIN_FLAGS) || many_chains {
        score += 0.25;
    }
    if realtime {
        score += 0.2;
    }

    score.clamp(0.0, 1.0)
}

fn risk_score(
    domains: &BTreeSet<DomainTag>,
    operations: &BTreeSet<OperationTag>,
    args: &ToolArgs,
) -> f64 {
    let mut risk = BASE_RISK;

    if domains.contains(&DomainTag::Security) {
        risk += 0.3;
    }
    if domains.contains(&DomainTag::Bridge) {
        risk += 0.25;
    }
    if domains.contains(&DomainTag::Alpha) {
        risk += 0.2;
    }
    if operations.contains(&OperationTag::Execute) {
        risk += 0.25;
    }
    if operations.contains(&OperationTag::Optimize) {
        risk += 0.15;
    }

    let mainnet = arg_flag(args, MAINNET_FLAGS)
        || arg_str(args, "network")
            .map(|n| n.eq_ignore_ascii_case("mainnet"))
            .unwrap_or(false);
    if mainnet {
        risk += 0.15;
    }

    let large_value = VALUE_ARGS
        .iter()
        .filter_map(|key| arg_f64(args, key))
        .any(|v| v >= LARGE_VALUE_USD);
    if large_value {
        risk += 0.2;
    }

    risk.clamp(0.0, 1.0)
}

fn priority_score(
    risk: f64,
    realtime: bool,
    operations: &BTreeSet<OperationTag>,
    args: &ToolArgs,
) -> f64 {
    if let Some(explicit) = arg_str(args, "priority").and_then(|p| p.parse::<Priority>().ok()) {
        return explicit.score();
    }

    let mut score: f64 = 0.5;
    if risk >= 0.6 {
        score += 0.2;
    }
    if realtime {
        score += 0.15;
    }
    // Pure reporting is background work
    if !operations.is_empty() && operations.iter().all(|op| *op == OperationTag::Report) {
        score -= 0.25;
    }
    score.clamp(0.0, 1.0)
}

fn resource_estimate(level: ComplexityLevel, domain_count: usize) -> ResourceEstimate {
    let base = match level {
        ComplexityLevel::Simple => ResourceEstimate::new(2_000, 2_000, 64),
        ComplexityLevel::Moderate => ResourceEstimate::new(8_000, 8_000, 128),
        ComplexityLevel::Complex => ResourceEstimate::new(25_000, 25_000, 256),
    };
    let extra = domain_count.saturating_sub(1) as u64;
    ResourceEstimate {
        tokens: base.tokens + extra * 1_500,
        time_ms: base.time_ms + extra * 1_500,
        memory_mb: base.memory_mb + extra * 16,
    }
}
