//! Short-horizon usage forecasting
//!
//! Keeps a bounded history of snapshots and extrapolates the cpu, memory,
//! token and rate-limit ratios with a least-squares slope over the most
//! recent window. Chain congestion is externally driven and held constant.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::snapshot::{
    sanitize, ResourceSnapshot, CHAIN_WEIGHT, CPU_WEIGHT, MEMORY_WEIGHT, RATE_LIMIT_WEIGHT,
    TOKEN_WEIGHT,
};
use super::zone::Zone;

const MIN_SAMPLES: usize = 3;

/// Projected usage `look_ahead_ms` from now
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub projected_usage: f64,
    pub projected_zone: Zone,
    pub confidence: f64,
    /// Per-tick slopes (ratio units) for cpu, memory, tokens, rate limit
    pub trends: [f64; 4],
    pub look_ahead_ms: u64,
}

#[derive(Debug)]
pub struct UsagePredictor {
    history: VecDeque<ResourceSnapshot>,
    capacity: usize,
    window: usize,
    look_ahead_ms: u64,
    sample_interval_ms: u64,
}

impl UsagePredictor {
    pub fn new(
        capacity: usize,
        window: usize,
        look_ahead_ms: u64,
        sample_interval_ms: u64,
    ) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            window: window.max(2),
            look_ahead_ms,
            sample_interval_ms: sample_interval_ms.max(1),
        }
    }

    pub fn record(&mut self, snapshot: ResourceSnapshot) {
        self.history.push_back(snapshot);
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn forecast(&self) -> Option<Forecast> {
        if self.history.len() < MIN_SAMPLES {
            return None;
        }

        let start = self.history.len().saturating_sub(self.window);
        let recent: Vec<&ResourceSnapshot> = self.history.iter().skip(start).collect();
        let last = recent.last()?;

        let series = |f: fn(&ResourceSnapshot) -> f64| -> Vec<f64> {
            recent.iter().map(|s| sanitize(f(s)) / 100.0).collect()
        };
        let trends = [
            slope(&series(|s| s.cpu_pct)),
            slope(&series(|s| s.memory_pct)),
            slope(&series(|s| s.token_pct)),
            slope(&series(|s| s.rate_limit_pct)),
        ];

        let steps = self.look_ahead_ms as f64 / self.sample_interval_ms as f64;
        let project = |current_pct: f64, trend: f64| -> f64 {
            (sanitize(current_pct) / 100.0 + trend * steps).clamp(0.0, 1.0) * 100.0
        };

        let projected_usage = (project(last.cpu_pct, trends[0]) * CPU_WEIGHT
            + project(last.memory_pct, trends[1]) * MEMORY_WEIGHT
            + project(last.token_pct, trends[2]) * TOKEN_WEIGHT
            + project(last.rate_limit_pct, trends[3]) * RATE_LIMIT_WEIGHT
            + sanitize(last.chain_congestion_pct) * CHAIN_WEIGHT)
            .clamp(0.0, 100.0);

        let confidence = (1.0 - std_dev(&trends)).clamp(0.0, 1.0);

        Some(Forecast {
            projected_usage,
            projected_zone: Zone::from_usage(projected_usage),
            confidence,
            trends,
            look_ahead_ms: self.look_ahead_ms,
        })
    }
}

/// Least-squares slope of `ys` against x = 0, 1, 2, ...
pub(crate) fn slope(ys: &[f64]) -> f64 {
    let n = ys.len() as f64;
    if ys.len() < 2 {
        return 0.0;
    }
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = ys.iter().sum::<f64>() / n;

    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in ys.iter().enumerate() {
        let dx = i as f64 - mean_x;
        num += dx * (y - mean_y);
        den += dx * dx;
    }
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}
