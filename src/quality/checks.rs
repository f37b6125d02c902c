//! Built-in quality checks, one per step
//!
//! Checks start from 100 and deduct per finding. The gate decides pass/fail
//! against the step threshold, so a check only reports what it saw.

use regex::Regex;
use serde_json::{json, Map, Value};

use super::context::ValidationContext;
use super::step::{QualityStep, StepResult, ValidationPhase};
use crate::classifier::is_known_tool;
use crate::domain::{RequestDescriptor, ToolArgs};
use crate::error::Result;
use crate::governor::{ResourceGovernor, Zone};

pub const SUPPORTED_CHAINS: &[&str] = &[
    "ethereum", "bsc", "polygon", "arbitrum", "optimism", "base", "avalanche", "solana",
];

const MAX_STRING_LEN: usize = 10_000;
const MAX_NESTING: usize = 8;
const MAX_INPUT_BYTES: usize = 64 * 1024;
const MAX_OUTPUT_BYTES: usize = 1024 * 1024;
const MAX_ARGS: usize = 25;
const SLOW_ESTIMATE_MS: u64 = 60_000;
const HEAVY_ESTIMATE_TOKENS: u64 = 100_000;

const NON_NEGATIVE_ARGS: &[&str] = &[
    "limit",
    "amount",
    "amount_usd",
    "value_usd",
    "notional",
    "size_usd",
    "scope",
    "scope_size",
    "item_count",
    "min_liquidity",
    "days",
    "hours",
];

/// Everything a check may look at
pub struct CheckInput<'a> {
    pub operation: &'a str,
    pub phase: ValidationPhase,
    pub inputs: &'a ToolArgs,
    pub outputs: Option<&'a Map<String, Value>>,
    pub context: &'a ValidationContext,
    pub descriptor: Option<&'a RequestDescriptor>,
    pub governor: Option<&'a ResourceGovernor>,
    /// Steps already run in this pass
    pub completed: &'a [StepResult],
}

/// Raw findings of one check
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub score: f64,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    pub evidence: Value,
}

impl Default for CheckOutcome {
    fn default() -> Self {
        Self {
            score: 100.0,
            issues: Vec::new(),
            warnings: Vec::new(),
            evidence: Value::Null,
        }
    }
}

impl CheckOutcome {
    pub fn deduct(&mut self, points: f64, issue: impl Into<String>) {
        self.score -= points;
        self.issues.push(issue.into());
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn with_evidence(mut self, evidence: Value) -> Self {
        self.evidence = evidence;
        self
    }
}

pub trait QualityCheck: Send + Sync {
    fn step(&self) -> QualityStep;

    /// An `Err` is recorded as a zero-score failure of this step
    fn run(&self, input: &CheckInput<'_>) -> Result<CheckOutcome>;
}

/// Visit every (key, value) pair, descending into objects and arrays.
/// Array elements are reported under their parent key.
fn walk<'v>(
    key: &'v str,
    value: &'v Value,
    depth: usize,
    f: &mut dyn FnMut(&'v str, &'v Value, usize),
) {
    f(key, value, depth);
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                walk(k, v, depth + 1, f);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(key, item, depth + 1, f);
            }
        }
        _ => {}
    }
}

fn walk_args<'v>(args: &'v ToolArgs, f: &mut dyn FnMut(&'v str, &'v Value, usize)) {
    for (k, v) in args {
        walk(k, v, 1, f);
    }
}

fn walk_map<'v>(map: &'v Map<String, Value>, f: &mut dyn FnMut(&'v str, &'v Value, usize)) {
    for (k, v) in map {
        walk(k, v, 1, f);
    }
}

fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

pub struct InputValidationCheck;

impl QualityCheck for InputValidationCheck {
    fn step(&self) -> QualityStep {
        QualityStep::InputValidation
    }

    fn run(&self, input: &CheckInput<'_>) -> Result<CheckOutcome> {
        let mut outcome = CheckOutcome::default();

        if input.operation.trim().is_empty() {
            outcome.deduct(50.0, "operation id is empty");
        }

        for key in input.inputs.keys() {
            if !is_valid_key(key) {
                outcome.deduct(10.0, format!("argument name '{key}' is not a valid identifier"));
            }
        }

        let mut max_depth = 0;
        let mut findings = Vec::new();
        walk_args(input.inputs, &mut |key, value, depth| {
            max_depth = max_depth.max(depth);
            match value {
                Value::Null => findings.push(format!("argument '{key}' is null")),
                Value::String(s) if s.len() > MAX_STRING_LEN => {
                    findings.push(format!("argument '{key}' exceeds {MAX_STRING_LEN} bytes"))
                }
                _ => {}
            }
        });
        for finding in findings {
            outcome.deduct(10.0, finding);
        }
        if max_depth > MAX_NESTING {
            outcome.deduct(10.0, format!("arguments nested {max_depth} levels deep"));
        }

        Ok(outcome.with_evidence(json!({
            "argument_count": input.inputs.len(),
            "max_depth": max_depth,
        })))
    }
}

pub struct SecurityCheck {
    value_patterns: Vec<(&'static str, Regex)>,
    private_key: Regex,
    sensitive_key: Regex,
}

impl SecurityCheck {
    pub fn new() -> Result<Self> {
        let value_patterns = vec![
            (
                "script injection",
                Regex::new(r"(?i)<\s*script|javascript:|\bon(error|load)\s*=")?,
            ),
            ("path traversal", Regex::new(r"\.\.[/\\]")?),
            (
                "shell injection",
                Regex::new(r"\$\(|`|;\s*(rm|curl|wget|sh)\s")?,
            ),
            (
                "sql injection",
                Regex::new(r"(?i)'\s*or\s+'?1'?\s*=\s*'?1|;\s*drop\s+table|\bunion\s+select\b")?,
            ),
        ];
        Ok(Self {
            value_patterns,
            private_key: Regex::new(r"^(0x)?[0-9a-fA-F]{64}$")?,
            sensitive_key: Regex::new(
                r"(?i)^(private_?key|secret_?key|mnemonic|seed(_?phrase)?|password)$",
            )?,
        })
    }

    fn scan(&self, key: &str, value: &Value, findings: &mut Vec<String>) {
        if self.sensitive_key.is_match(key) {
            findings.push(format!("sensitive field '{key}' present"));
        }
        let Value::String(text) = value else {
            return;
        };
        for (name, pattern) in &self.value_patterns {
            if pattern.is_match(text) {
                findings.push(format!("{name} pattern in '{key}'"));
            }
        }
        let hash_like = key.ends_with("hash") || key.ends_with("_id");
        if !hash_like && self.private_key.is_match(text.trim()) {
            findings.push(format!("'{key}' looks like a raw private key"));
        }
    }
}

impl QualityCheck for SecurityCheck {
    fn step(&self) -> QualityStep {
        QualityStep::SecurityCheck
    }

    fn run(&self, input: &CheckInput<'_>) -> Result<CheckOutcome> {
        let mut findings = Vec::new();
        let mut scanned = 0usize;

        walk_args(input.inputs, &mut |key, value, _| {
            scanned += 1;
            self.scan(key, value, &mut findings);
        });
        if let Some(outputs) = input.outputs {
            walk_map(outputs, &mut |key, value, _| {
                scanned += 1;
                self.scan(key, value, &mut findings);
            });
        }

        // duplicates from sensitive keys repeated inside arrays
        findings.dedup();

        let mut outcome = CheckOutcome::default();
        for finding in &findings {
            outcome.deduct(40.0, finding.clone());
        }
        Ok(outcome.with_evidence(json!({
            "values_scanned": scanned,
            "findings": findings.len(),
        })))
    }
}

pub struct ResourceCheck;

impl ResourceCheck {
    fn zone_score(zone: Zone) -> f64 {
        match zone {
            Zone::Green => 100.0,
            Zone::Yellow => 90.0,
            Zone::Orange => 80.0,
            Zone::Red => 60.0,
            Zone::Critical => 20.0,
        }
    }
}

impl QualityCheck for ResourceCheck {
    fn step(&self) -> QualityStep {
        QualityStep::ResourceAvailability
    }

    fn run(&self, input: &CheckInput<'_>) -> Result<CheckOutcome> {
        let mut outcome = CheckOutcome::default();
        let Some(governor) = input.governor else {
            outcome.warn("no resource governor attached; availability not measured");
            return Ok(outcome.with_evidence(json!({ "measured": false })));
        };

        let view = governor.view();
        outcome.score = Self::zone_score(view.zone);
        if view.zone >= Zone::Red {
            outcome
                .issues
                .push(format!("resource pressure in {} zone ({:.1}%)", view.zone, view.usage));
        } else if view.zone >= Zone::Yellow {
            outcome.warn(format!("elevated resource usage ({:.1}%)", view.usage));
        }

        let mut admitted = None;
        if let (Some(descriptor), ValidationPhase::PreFlight) = (input.descriptor, input.phase) {
            let admission = governor.admit(descriptor);
            if !admission.allowed {
                outcome.score = outcome.score.min(50.0);
                outcome.issues.push(
                    admission
                        .reason
                        .clone()
                        .unwrap_or_else(|| "admission refused".to_string()),
                );
            }
            admitted = Some(admission.allowed);
        }

        Ok(outcome.with_evidence(json!({
            "measured": true,
            "zone": view.zone,
            "usage": view.usage,
            "admitted": admitted,
        })))
    }
}

pub struct CompatibilityCheck;

impl QualityCheck for CompatibilityCheck {
    fn step(&self) -> QualityStep {
        QualityStep::Compatibility
    }

    fn run(&self, input: &CheckInput<'_>) -> Result<CheckOutcome> {
        let mut outcome = CheckOutcome::default();

        let known = is_known_tool(input.operation);
        if !known {
            outcome.deduct(20.0, format!("'{}' is not in the tool catalog", input.operation));
        }

        let mut chains: Vec<&str> = Vec::new();
        if let Some(Value::String(chain)) = input.inputs.get("chain") {
            chains.push(chain);
        }
        if let Some(Value::Array(items)) = input.inputs.get("chains") {
            chains.extend(items.iter().filter_map(Value::as_str));
        }
        for chain in &chains {
            if !SUPPORTED_CHAINS.contains(&chain.to_ascii_lowercase().as_str()) {
                outcome.deduct(15.0, format!("unsupported chain '{chain}'"));
            }
        }

        Ok(outcome.with_evidence(json!({
            "known_tool": known,
            "chains": chains,
        })))
    }
}

pub struct PerformanceCheck;

impl QualityCheck for PerformanceCheck {
    fn step(&self) -> QualityStep {
        QualityStep::Performance
    }

    fn run(&self, input: &CheckInput<'_>) -> Result<CheckOutcome> {
        let mut outcome = CheckOutcome::default();

        if input.inputs.len() > MAX_ARGS {
            outcome.deduct(10.0, format!("{} arguments exceeds {MAX_ARGS}", input.inputs.len()));
        }

        let input_bytes = serde_json::to_vec(input.inputs)?.len();
        if input_bytes > MAX_INPUT_BYTES {
            outcome.deduct(20.0, format!("input payload is {input_bytes} bytes"));
        }

        let output_bytes = match input.outputs {
            Some(outputs) => serde_json::to_vec(outputs)?.len(),
            None => 0,
        };
        if output_bytes > MAX_OUTPUT_BYTES {
            outcome.deduct(20.0, format!("output payload is {output_bytes} bytes"));
        }

        if let Some(descriptor) = input.descriptor {
            let estimate = &descriptor.resource_estimate;
            if estimate.time_ms > SLOW_ESTIMATE_MS {
                outcome.deduct(15.0, format!("estimated {}ms runtime", estimate.time_ms));
            }
            if estimate.tokens > HEAVY_ESTIMATE_TOKENS {
                outcome.deduct(15.0, format!("estimated {} tokens", estimate.tokens));
            }
        }

        Ok(outcome.with_evidence(json!({
            "input_bytes": input_bytes,
            "output_bytes": output_bytes,
        })))
    }
}

pub struct DataIntegrityCheck;

impl DataIntegrityCheck {
    fn inspect(key: &str, value: &Value, findings: &mut Vec<String>) {
        if let Some(n) = value.as_f64() {
            if NON_NEGATIVE_ARGS.contains(&key) && n < 0.0 {
                findings.push(format!("'{key}' must not be negative ({n})"));
            }
            let bounded = key.ends_with("_pct") || key == "score" || key.ends_with("_score");
            if bounded && !(0.0..=100.0).contains(&n) {
                findings.push(format!("'{key}' outside [0,100] ({n})"));
            }
        }
        if let Value::String(s) = value {
            let is_address = key == "address" || key.ends_with("_address");
            if is_address && s.starts_with("0x") {
                let well_formed =
                    s.len() == 42 && s[2..].chars().all(|c| c.is_ascii_hexdigit());
                if !well_formed {
                    findings.push(format!("'{key}' is not a 20-byte hex address"));
                }
            }
        }
    }
}

impl QualityCheck for DataIntegrityCheck {
    fn step(&self) -> QualityStep {
        QualityStep::DataIntegrity
    }

    fn run(&self, input: &CheckInput<'_>) -> Result<CheckOutcome> {
        let mut findings = Vec::new();
        walk_args(input.inputs, &mut |key, value, _| {
            Self::inspect(key, value, &mut findings)
        });
        if let Some(outputs) = input.outputs {
            walk_map(outputs, &mut |key, value, _| {
                Self::inspect(key, value, &mut findings)
            });
        }

        let mut outcome = CheckOutcome::default();
        for finding in &findings {
            outcome.deduct(25.0, finding.clone());
        }
        Ok(outcome.with_evidence(json!({ "violations": findings.len() })))
    }
}

pub struct OutputValidationCheck;

impl QualityCheck for OutputValidationCheck {
    fn step(&self) -> QualityStep {
        QualityStep::OutputValidation
    }

    fn run(&self, input: &CheckInput<'_>) -> Result<CheckOutcome> {
        let mut outcome = CheckOutcome::default();

        let outputs = match (input.phase, input.outputs) {
            (ValidationPhase::PreFlight, _) => {
                outcome.warn("outputs are not available before execution");
                return Ok(outcome.with_evidence(json!({ "checked": false })));
            }
            (ValidationPhase::PostFlight, Some(outputs)) if !outputs.is_empty() => outputs,
            (ValidationPhase::PostFlight, _) => {
                outcome.score = 0.0;
                outcome.issues.push("no outputs produced".to_string());
                return Ok(outcome.with_evidence(json!({ "checked": true, "keys": 0 })));
            }
        };

        if outputs.get("error").is_some_and(|e| !e.is_null()) {
            outcome.deduct(25.0, "output carries an error");
        }
        for (key, value) in outputs {
            let Value::Object(entry) = value else {
                continue;
            };
            if entry.get("success").and_then(Value::as_bool) == Some(false) {
                outcome.deduct(25.0, format!("'{key}' reported failure"));
            } else if entry.get("error").is_some_and(|e| !e.is_null()) {
                outcome.deduct(25.0, format!("'{key}' carries an error"));
            }
        }

        Ok(outcome.with_evidence(json!({ "checked": true, "keys": outputs.len() })))
    }
}

pub struct EvidenceCheck;

impl QualityCheck for EvidenceCheck {
    fn step(&self) -> QualityStep {
        QualityStep::EvidenceGeneration
    }

    fn run(&self, input: &CheckInput<'_>) -> Result<CheckOutcome> {
        let executed: Vec<&StepResult> = input.completed.iter().filter(|r| !r.skipped).collect();
        let missing: Vec<QualityStep> = executed
            .iter()
            .filter(|r| r.evidence.is_null())
            .map(|r| r.step)
            .collect();

        let mut outcome = CheckOutcome::default();
        if !executed.is_empty() {
            outcome.score = 100.0 * (executed.len() - missing.len()) as f64 / executed.len() as f64;
        }
        for step in &missing {
            outcome.issues.push(format!("{step} produced no evidence"));
        }

        Ok(outcome.with_evidence(json!({
            "steps_with_evidence": executed.len() - missing.len(),
            "steps_executed": executed.len(),
        })))
    }
}

/// The standard check for every step, in step order
pub fn default_checks() -> Result<Vec<Box<dyn QualityCheck>>> {
    Ok(vec![
        Box::new(InputValidationCheck),
        Box::new(SecurityCheck::new()?),
        Box::new(ResourceCheck),
        Box::new(CompatibilityCheck),
        Box::new(PerformanceCheck),
        Box::new(DataIntegrityCheck),
        Box::new(OutputValidationCheck),
        Box::new(EvidenceCheck),
    ])
}
