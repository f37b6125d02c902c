//! Tag vocabulary shared by the classifier, scheduler and wave planner

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Analysis domain a request touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainTag {
    /// Prices, volume, market structure
    Market,
    /// Lending, liquidity pools, yields
    Defi,
    /// Contract audits, honeypots, rug checks
    Security,
    /// Cross-chain bridges and flows
    Bridge,
    /// Early opportunities, new listings
    Alpha,
    /// Large holder movements
    Whale,
    /// Social and news sentiment
    Sentiment,
    /// Raw chain activity
    Onchain,
    Nft,
    Portfolio,
}

impl DomainTag {
    pub const ALL: [DomainTag; 10] = [
        DomainTag::Market,
        DomainTag::Defi,
        DomainTag::Security,
        DomainTag::Bridge,
        DomainTag::Alpha,
        DomainTag::Whale,
        DomainTag::Sentiment,
        DomainTag::Onchain,
        DomainTag::Nft,
        DomainTag::Portfolio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DomainTag::Market => "market",
            DomainTag::Defi => "defi",
            DomainTag::Security => "security",
            DomainTag::Bridge => "bridge",
            DomainTag::Alpha => "alpha",
            DomainTag::Whale => "whale",
            DomainTag::Sentiment => "sentiment",
            DomainTag::Onchain => "onchain",
            DomainTag::Nft => "nft",
            DomainTag::Portfolio => "portfolio",
        }
    }

    /// Domains where a wrong answer can cost funds
    pub fn is_security_sensitive(&self) -> bool {
        matches!(self, DomainTag::Security | DomainTag::Bridge)
    }
}

impl std::fmt::Display for DomainTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DomainTag {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        DomainTag::ALL
            .iter()
            .copied()
            .find(|tag| tag.as_str() == normalized)
            .ok_or_else(|| format!("unknown domain tag: {raw}"))
    }
}

/// Kind of work a request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationTag {
    Analyze,
    Scan,
    Monitor,
    Track,
    Compare,
    Predict,
    Optimize,
    Execute,
    Audit,
    Report,
}

impl OperationTag {
    pub const ALL: [OperationTag; 10] = [
        OperationTag::Analyze,
        OperationTag::Scan,
        OperationTag::Monitor,
        OperationTag::Track,
        OperationTag::Compare,
        OperationTag::Predict,
        OperationTag::Optimize,
        OperationTag::Execute,
        OperationTag::Audit,
        OperationTag::Report,
    ];

    /// Operations that always make a request eligible for staged execution
    pub const COMPLEX: [OperationTag; 3] = [
        OperationTag::Audit,
        OperationTag::Optimize,
        OperationTag::Execute,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationTag::Analyze => "analyze",
            OperationTag::Scan => "scan",
            OperationTag::Monitor => "monitor",
            OperationTag::Track => "track",
            OperationTag::Compare => "compare",
            OperationTag::Predict => "predict",
            OperationTag::Optimize => "optimize",
            OperationTag::Execute => "execute",
            OperationTag::Audit => "audit",
            OperationTag::Report => "report",
        }
    }

    pub fn is_complex(&self) -> bool {
        Self::COMPLEX.contains(self)
    }
}

impl std::fmt::Display for OperationTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationTag {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        OperationTag::ALL
            .iter()
            .copied()
            .find(|tag| tag.as_str() == normalized)
            .ok_or_else(|| format!("unknown operation tag: {raw}"))
    }
}

/// Request priority (lower ordinal wins, like the order queue)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical = 0,
    High = 1,
    #[default]
    Normal = 2,
    Low = 3,
}

impl Priority {
    /// Map a priority score in [0,1] onto a priority band
    pub fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            Priority::Critical
        } else if score >= 0.6 {
            Priority::High
        } else if score >= 0.3 {
            Priority::Normal
        } else {
            Priority::Low
        }
    }

    /// Representative score for an explicit priority label
    pub fn score(&self) -> f64 {
        match self {
            Priority::Critical => 1.0,
            Priority::High => 0.75,
            Priority::Normal => 0.5,
            Priority::Low => 0.2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "normal" | "medium" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            _ => Err(format!(
                "invalid priority '{raw}'; expected critical|high|normal|low"
            )),
        }
    }
}

/// Coarse complexity band derived from the complexity score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityLevel {
    Simple,
    Moderate,
    Complex,
}

impl ComplexityLevel {
    pub const MODERATE_THRESHOLD: f64 = 0.3;
    pub const COMPLEX_THRESHOLD: f64 = 0.7;

    pub fn from_score(score: f64) -> Self {
        if score >= Self::COMPLEX_THRESHOLD {
            ComplexityLevel::Complex
        } else if score >= Self::MODERATE_THRESHOLD {
            ComplexityLevel::Moderate
        } else {
            ComplexityLevel::Simple
        }
    }
}

impl std::fmt::Display for ComplexityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComplexityLevel::Simple => write!(f, "simple"),
            ComplexityLevel::Moderate => write!(f, "moderate"),
            ComplexityLevel::Complex => write!(f, "complex"),
        }
    }
}
