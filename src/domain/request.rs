//! Request descriptor and argument helpers

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

use super::tags::{ComplexityLevel, DomainTag, OperationTag, Priority};

/// Argument bag of an inbound tool call.
///
/// A `BTreeMap` keeps keys sorted, so serializing it is canonical and cache
/// keys do not depend on the order the transport inserted the keys in.
pub type ToolArgs = BTreeMap<String, Value>;

/// Estimated cost of serving a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceEstimate {
    pub tokens: u64,
    pub time_ms: u64,
    pub memory_mb: u64,
}

impl ResourceEstimate {
    pub const fn new(tokens: u64, time_ms: u64, memory_mb: u64) -> Self {
        Self {
            tokens,
            time_ms,
            memory_mb,
        }
    }
}

/// Structured classification of one inbound call. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub tool_id: String,
    pub args: ToolArgs,
    pub complexity_score: f64,
    pub complexity_level: ComplexityLevel,
    pub domains: BTreeSet<DomainTag>,
    pub operations: BTreeSet<OperationTag>,
    pub confidence: f64,
    pub risk_score: f64,
    pub priority_score: f64,
    pub resource_estimate: ResourceEstimate,
    pub suggested_workers: Vec<String>,
    pub wave_eligible: bool,
    pub parallel_eligible: bool,
    /// Number of items (tokens, addresses, pools...) the request covers
    pub scope_size: usize,
    /// Caller asked for live data; results must not be served from cache
    pub realtime: bool,
}

impl RequestDescriptor {
    pub fn priority(&self) -> Priority {
        Priority::from_score(self.priority_score)
    }

    pub fn is_complex(&self) -> bool {
        self.complexity_level == ComplexityLevel::Complex
    }

    pub fn domain_count(&self) -> usize {
        self.domains.len()
    }

    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    pub fn has_domain(&self, tag: DomainTag) -> bool {
        self.domains.contains(&tag)
    }

    pub fn has_operation(&self, tag: OperationTag) -> bool {
        self.operations.contains(&tag)
    }

    /// Stable hash of (tool id, args)
    pub fn cache_key(&self) -> String {
        request_key(&self.tool_id, &self.args)
    }
}

/// Content hash of a tool call, independent of argument insertion order
pub fn request_key(tool_id: &str, args: &ToolArgs) -> String {
    let payload = serde_json::to_vec(args).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(tool_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(payload);
    hex::encode(hasher.finalize())
}

/// Whether an argument value counts as "set"
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => {
            let s = s.trim().to_ascii_lowercase();
            !(s.is_empty() || s == "false" || s == "0" || s == "no" || s == "off")
        }
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// True if any of `names` is present with a truthy value
pub fn arg_flag(args: &ToolArgs, names: &[&str]) -> bool {
    names
        .iter()
        .any(|name| args.get(*name).map(is_truthy).unwrap_or(false))
}

/// Numeric argument, accepting numbers or numeric strings
pub fn arg_f64(args: &ToolArgs, name: &str) -> Option<f64> {
    match args.get(name)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

pub fn arg_str<'a>(args: &'a ToolArgs, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

/// Number of items a call covers.
///
/// An explicit `scope`/`scope_size`/`limit`/`item_count` wins; otherwise
/// the lengths of all array-valued arguments are summed. Never below 1.
pub fn scope_size(args: &ToolArgs) -> usize {
    for key in ["scope", "scope_size", "item_count", "limit"] {
        if let Some(n) = arg_f64(args, key) {
            if n.is_finite() && n >= 1.0 {
                return n as usize;
            }
        }
    }

    let from_arrays: usize = args
        .values()
        .filter_map(Value::as_array)
        .map(|items| items.len())
        .sum();

    from_arrays.max(1)
}

/// Build a `ToolArgs` from `key=value` pairs (CLI / tests).
///
/// Values are parsed as JSON when possible, otherwise kept as strings.
pub fn parse_arg_pairs<I, S>(pairs: I) -> crate::error::Result<ToolArgs>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut args = ToolArgs::new();
    for pair in pairs {
        let pair = pair.as_ref();
        let (key, raw) = pair.split_once('=').ok_or_else(|| {
            crate::error::SextantError::InvalidArgument(format!(
                "expected key=value, got '{pair}'"
            ))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(crate::error::SextantError::InvalidArgument(format!(
                "empty argument name in '{pair}'"
            )));
        }
        let value = serde_json::from_str::<Value>(raw.trim())
            .unwrap_or_else(|_| Value::String(raw.trim().to_string()));
        args.insert(key.to_string(), value);
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_key_ignores_insertion_order() {
        let mut a = ToolArgs::new();
        a.insert("token".into(), json!("ETH"));
        a.insert("chain".into(), json!("ethereum"));

        let mut b = ToolArgs::new();
        b.insert("chain".into(), json!("ethereum"));
        b.insert("token".into(), json!("ETH"));

        assert_eq!(request_key("token_analysis", &a), request_key("token_analysis", &b));
        assert_ne!(request_key("token_analysis", &a), request_key("whale_tracker", &a));
    }

    #[test]
    fn test_truthiness() {
        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!("yes")));
        assert!(is_truthy(&json!([1])));
        assert!(!is_truthy(&json!("false")));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!([])));
        assert!(!is_truthy(&Value::Null));
    }

    #[test]
    fn test_scope_size() {
        let mut args = ToolArgs::new();
        assert_eq!(scope_size(&args), 1);

        args.insert("tokens".into(), json!(["ETH", "BTC", "SOL"]));
        args.insert("wallets".into(), json!(["0x1", "0x2"]));
        assert_eq!(scope_size(&args), 5);

        args.insert("limit".into(), json!(40));
        assert_eq!(scope_size(&args), 40);
    }

    #[test]
    fn test_parse_arg_pairs() {
        let args = parse_arg_pairs([
            "deep=true",
            "limit=25",
            "token=PEPE",
            "chains=[\"eth\",\"base\"]",
        ])
        .unwrap();
        assert_eq!(args["deep"], json!(true));
        assert_eq!(args["limit"], json!(25));
        assert_eq!(args["token"], json!("PEPE"));
        assert_eq!(args["chains"], json!(["eth", "base"]));
        assert!(parse_arg_pairs(["missing-separator"]).is_err());
    }
}
