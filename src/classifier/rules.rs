//! Keyword rule table for request classification.
//!
//! Matching is plain substring search over a lower-cased text blob, so it is a
//! heuristic: false positives and negatives are expected.

use crate::domain::{DomainTag, OperationTag};

/// One classification rule
#[derive(Debug, Clone)]
pub struct PatternRule {
    pub name: &'static str,
    pub keywords: &'static [&'static str],
    pub domains: &'static [DomainTag],
    pub operations: &'static [OperationTag],
    /// Scaled by 0.2 and added to the complexity score on match
    pub complexity_modifier: f64,
    pub base_confidence: f64,
    pub workers: &'static [&'static str],
}

impl PatternRule {
    /// Rule matches if any keyword occurs in the (lower-cased) blob
    pub fn matches(&self, blob: &str) -> bool {
        self.keywords.iter().any(|kw| blob.contains(kw))
    }
}

/// Fixed catalog of tool ids exposed to the host
pub const TOOL_CATALOG: &[&str] = &[
    "market_overview",
    "token_price",
    "token_security_scan",
    "contract_audit",
    "bridge_flow_analysis",
    "cross_chain_monitor",
    "alpha_scanner",
    "whale_tracker",
    "smart_money_flow",
    "defi_yield_scan",
    "pool_compare",
    "sentiment_pulse",
    "portfolio_health",
    "portfolio_optimizer",
    "nft_floor_tracker",
    "risk_dashboard",
    "trade_executor",
    "market_report",
];

pub fn is_known_tool(tool_id: &str) -> bool {
    TOOL_CATALOG.contains(&tool_id)
}

/// Worker used when nothing matched
pub const FALLBACK_WORKER: &str = "market_agent";

pub const DEEP_FLAGS: &[&str] = &["deep", "deep_scan", "deep_analysis"];
pub const HISTORY_FLAGS: &[&str] = &["history", "include_history", "historical"];
pub const MULTI_CHAIN_FLAGS: &[&str] = &["multi_chain", "multichain", "cross_chain"];
pub const REALTIME_FLAGS: &[&str] = &["realtime", "real_time", "live"];
pub const MAINNET_FLAGS: &[&str] = &["mainnet"];
pub const VALUE_ARGS: &[&str] = &["amount", "amount_usd", "value_usd", "notional", "size_usd"];

/// Value above which a request counts as large (USD)
pub const LARGE_VALUE_USD: f64 = 100_000.0;

pub fn default_rules() -> Vec<PatternRule> {
    use DomainTag as D;
    use OperationTag as O;

    vec![
        PatternRule {
            name: "market",
            keywords: &["price", "market", "volume", "ticker", "chart", "ohlc", "liquidity"],
            domains: &[D::Market],
            operations: &[O::Analyze],
            complexity_modifier: 0.5,
            base_confidence: 0.85,
            workers: &["market_agent"],
        },
        PatternRule {
            name: "security",
            keywords: &["security", "audit", "honeypot", "rug", "scam", "exploit"],
            domains: &[D::Security],
            operations: &[O::Audit, O::Scan],
            complexity_modifier: 1.5,
            base_confidence: 0.9,
            workers: &["security_agent"],
        },
        PatternRule {
            name: "bridge",
            keywords: &["bridge", "cross_chain", "cross-chain", "multichain", "multi_chain"],
            domains: &[D::Bridge, D::Onchain],
            operations: &[O::Track],
            complexity_modifier: 1.2,
            base_confidence: 0.8,
            workers: &["bridge_agent"],
        },
        PatternRule {
            name: "alpha",
            keywords: &["alpha", "gem", "early", "launch", "new_listing", "presale"],
            domains: &[D::Alpha, D::Market],
            operations: &[O::Predict, O::Scan],
            complexity_modifier: 1.0,
            base_confidence: 0.7,
            workers: &["alpha_agent"],
        },
        PatternRule {
            name: "whale",
            keywords: &["whale", "smart_money", "large_holder", "accumulation"],
            domains: &[D::Whale, D::Onchain],
            operations: &[O::Track, O::Monitor],
            complexity_modifier: 0.8,
            base_confidence: 0.85,
            workers: &["whale_agent"],
        },
        PatternRule {
            name: "defi",
            keywords: &["defi", "yield", "apy", "pool", "lending", "farm", "tvl"],
            domains: &[D::Defi],
            operations: &[O::Analyze, O::Compare],
            complexity_modifier: 0.8,
            base_confidence: 0.8,
            workers: &["defi_agent"],
        },
        PatternRule {
            name: "sentiment",
            keywords: &["sentiment", "social", "twitter", "news", "hype", "fear", "greed"],
            domains: &[D::Sentiment],
            operations: &[O::Analyze],
            complexity_modifier: 0.5,
            base_confidence: 0.75,
            workers: &["sentiment_agent"],
        },
        PatternRule {
            name: "portfolio",
            keywords: &["portfolio", "wallet", "holdings", "balance", "pnl"],
            domains: &[D::Portfolio],
            operations: &[O::Analyze, O::Report],
            complexity_modifier: 0.7,
            base_confidence: 0.8,
            workers: &["portfolio_agent"],
        },
        PatternRule {
            name: "nft",
            keywords: &["nft", "floor", "collection", "mint"],
            domains: &[D::Nft],
            operations: &[O::Track],
            complexity_modifier: 0.6,
            base_confidence: 0.75,
            workers: &["nft_agent"],
        },
        PatternRule {
            name: "optimization",
            keywords: &["optimi", "rebalance", "allocat", "strategy"],
            domains: &[D::Portfolio, D::Defi],
            operations: &[O::Optimize],
            complexity_modifier: 1.3,
            base_confidence: 0.7,
            workers: &["portfolio_agent", "risk_agent"],
        },
        PatternRule {
            name: "execution",
            keywords: &["execute", "executor", "swap", "trade", "order"],
            domains: &[D::Market],
            operations: &[O::Execute],
            complexity_modifier: 1.5,
            base_confidence: 0.65,
            workers: &["execution_agent"],
        },
        PatternRule {
            name: "monitoring",
            keywords: &["monitor", "alert", "watch", "realtime", "real_time"],
            domains: &[],
            operations: &[O::Monitor],
            complexity_modifier: 0.4,
            base_confidence: 0.8,
            workers: &[],
        },
        PatternRule {
            name: "onchain",
            keywords: &["onchain", "on_chain", "transaction", "holder", "flow", "address"],
            domains: &[D::Onchain],
            operations: &[O::Track, O::Analyze],
            complexity_modifier: 0.6,
            base_confidence: 0.8,
            workers: &["onchain_agent"],
        },
        PatternRule {
            name: "risk",
            keywords: &["risk", "exposure", "drawdown", "volatility"],
            domains: &[D::Portfolio, D::Market],
            operations: &[O::Analyze],
            complexity_modifier: 1.0,
            base_confidence: 0.75,
            workers: &["risk_agent"],
        },
        PatternRule {
            name: "report",
            keywords: &["report", "summary", "overview", "digest"],
            domains: &[],
            operations: &[O::Report],
            complexity_modifier: 0.3,
            base_confidence: 0.8,
            workers: &[],
        },
        PatternRule {
            name: "compare",
            keywords: &["compare", "versus", "_vs_", " vs "],
            domains: &[],
            operations: &[O::Compare],
            complexity_modifier: 0.5,
            base_confidence: 0.75,
            workers: &[],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_table_is_well_formed() {
        for rule in default_rules() {
            assert!(!rule.keywords.is_empty(), "{} has no keywords", rule.name);
            assert!(
                (0.0..=1.0).contains(&rule.base_confidence),
                "{} confidence out of range",
                rule.name
            );
            for kw in rule.keywords {
                assert_eq!(*kw, kw.to_lowercase(), "{} keyword not lower-case", rule.name);
            }
        }
    }

    #[test]
    fn test_every_catalog_tool_matches_a_rule() {
        let rules = default_rules();
        for tool in TOOL_CATALOG {
            assert!(
                rules.iter().any(|r| r.matches(tool)),
                "catalog tool {tool} matches no rule"
            );
        }
    }
}
