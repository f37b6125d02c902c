use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::zone::Zone;

pub const CPU_WEIGHT: f64 = 0.25;
pub const MEMORY_WEIGHT: f64 = 0.25;
pub const TOKEN_WEIGHT: f64 = 0.30;
pub const RATE_LIMIT_WEIGHT: f64 = 0.10;
pub const CHAIN_WEIGHT: f64 = 0.10;

/// Point-in-time resource usage, each ratio in percent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub cpu_pct: f64,
    pub memory_pct: f64,
    pub token_pct: f64,
    pub rate_limit_pct: f64,
    pub chain_congestion_pct: f64,
    pub taken_at: DateTime<Utc>,
}

impl Default for ResourceSnapshot {
    fn default() -> Self {
        Self::uniform(0.0)
    }
}

impl ResourceSnapshot {
    /// Snapshot with every ratio at the same level
    pub fn uniform(pct: f64) -> Self {
        Self {
            cpu_pct: pct,
            memory_pct: pct,
            token_pct: pct,
            rate_limit_pct: pct,
            chain_congestion_pct: pct,
            taken_at: Utc::now(),
        }
    }

    /// Weighted overall usage in percent
    pub fn overall_usage(&self) -> f64 {
        let usage = sanitize(self.cpu_pct) * CPU_WEIGHT
            + sanitize(self.memory_pct) * MEMORY_WEIGHT
            + sanitize(self.token_pct) * TOKEN_WEIGHT
            + sanitize(self.rate_limit_pct) * RATE_LIMIT_WEIGHT
            + sanitize(self.chain_congestion_pct) * CHAIN_WEIGHT;
        usage.clamp(0.0, 100.0)
    }

    pub fn zone(&self) -> Zone {
        Zone::from_usage(self.overall_usage())
    }
}

/// Clamp a percentage into [0,100]; unmeasurable values count as 0
pub(crate) fn sanitize(pct: f64) -> f64 {
    if pct.is_finite() {
        pct.clamp(0.0, 100.0)
    } else {
        0.0
    }
}
