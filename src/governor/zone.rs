//! Resource-pressure zones
//!
//! Zones partition [0,100] into contiguous half-open bands. CRITICAL is
//! closed at the top so 100% still has a home.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Zone {
    /// [0, 60)
    Green,
    /// [60, 75)
    Yellow,
    /// [75, 85)
    Orange,
    /// [85, 95)
    Red,
    /// [95, 100]
    Critical,
}

impl Default for Zone {
    fn default() -> Self {
        Zone::Green
    }
}

impl Zone {
    pub const ALL: [Zone; 5] = [
        Zone::Green,
        Zone::Yellow,
        Zone::Orange,
        Zone::Red,
        Zone::Critical,
    ];

    /// Zone containing a usage percentage. Out-of-range input is clamped;
    /// NaN is treated as 0 (fail open).
    pub fn from_usage(usage_pct: f64) -> Self {
        let usage = if usage_pct.is_nan() {
            0.0
        } else {
            usage_pct.clamp(0.0, 100.0)
        };

        if usage < 60.0 {
            Zone::Green
        } else if usage < 75.0 {
            Zone::Yellow
        } else if usage < 85.0 {
            Zone::Orange
        } else if usage < 95.0 {
            Zone::Red
        } else {
            Zone::Critical
        }
    }

    /// Inclusive lower bound
    pub fn lower_bound(&self) -> f64 {
        match self {
            Zone::Green => 0.0,
            Zone::Yellow => 60.0,
            Zone::Orange => 75.0,
            Zone::Red => 85.0,
            Zone::Critical => 95.0,
        }
    }

    /// Upper bound (exclusive except for CRITICAL)
    pub fn upper_bound(&self) -> f64 {
        match self {
            Zone::Green => 60.0,
            Zone::Yellow => 75.0,
            Zone::Orange => 85.0,
            Zone::Red => 95.0,
            Zone::Critical => 100.0,
        }
    }

    pub fn contains(&self, usage_pct: f64) -> bool {
        let lower = self.lower_bound();
        let upper = self.upper_bound();
        match self {
            Zone::Critical => usage_pct >= lower && usage_pct <= upper,
            _ => usage_pct >= lower && usage_pct < upper,
        }
    }

    /// Severity rank; strictly increases with the lower bound
    pub fn priority(&self) -> u8 {
        match self {
            Zone::Green => 0,
            Zone::Yellow => 1,
            Zone::Orange => 2,
            Zone::Red => 3,
            Zone::Critical => 4,
        }
    }

    pub fn is_worse_than(&self, other: Zone) -> bool {
        self.priority() > other.priority()
    }

    pub fn allowed_actions(&self) -> &'static [&'static str] {
        match self {
            Zone::Green => &[
                "all_operations",
                "parallel_fanout",
                "wave_execution",
                "caching",
                "prefetch",
            ],
            Zone::Yellow => &[
                "all_operations",
                "parallel_fanout",
                "wave_execution",
                "caching",
            ],
            Zone::Orange => &["normal_priority_and_above", "sequential_fanout", "caching"],
            Zone::Red => &["simple_and_moderate_requests", "cached_results"],
            Zone::Critical => &["critical_priority_only"],
        }
    }

    pub fn restrictions(&self) -> &'static [&'static str] {
        match self {
            Zone::Green => &[],
            Zone::Yellow => &["no_prefetch"],
            Zone::Orange => &["reject_low_priority", "compact_caches"],
            Zone::Red => &["reject_complex", "compact_caches", "force_collection"],
            Zone::Critical => &[
                "reject_non_critical",
                "compact_caches",
                "force_collection",
            ],
        }
    }
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Zone::Green => write!(f, "GREEN"),
            Zone::Yellow => write!(f, "YELLOW"),
            Zone::Orange => write!(f, "ORANGE"),
            Zone::Red => write!(f, "RED"),
            Zone::Critical => write!(f, "CRITICAL"),
        }
    }
}
