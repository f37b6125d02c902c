use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::agents::StaticBridge;
use crate::config::AppConfig;
use crate::coordinator::{OrchestrationOutcome, Orchestrator};
use crate::domain::{parse_arg_pairs, ToolArgs};
use crate::error::Result;
use crate::governor::{GovernorView, ResourceGovernor, Zone};
use crate::quality::ValidationContext;

#[derive(Parser)]
#[command(name = "sextant")]
#[command(author = "Sextant Team")]
#[command(version = "0.1.0")]
#[command(about = "Orchestration control plane for multi-agent crypto analytics tools", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Directory holding default.toml and <SEXTANT_ENV>.toml
    #[arg(short, long, default_value = "config", env = "SEXTANT_CONFIG_DIR")]
    pub config_dir: String,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Classify a tool call
    Classify {
        /// Tool id (e.g. token_price)
        tool: String,
        /// Arguments as key=value (values parsed as JSON when possible)
        args: Vec<String>,
    },
    /// Show the routing decision for a tool call
    Route {
        tool: String,
        args: Vec<String>,
    },
    /// Show the wave plan for a tool call, if it warrants one
    Plan {
        tool: String,
        args: Vec<String>,
    },
    /// List resource zones and what each permits
    Zones,
    /// Run the full pipeline against fixture workers
    Run {
        tool: String,
        args: Vec<String>,
        /// Session id for the validation context
        #[arg(long, default_value = "cli-session")]
        session: String,
        /// User id for the validation context
        #[arg(long, default_value = "cli-user")]
        user: String,
        /// Token budget for the validation context
        #[arg(long, default_value = "100000")]
        token_budget: u64,
        /// Give up after this many seconds (0 = no limit)
        #[arg(long, default_value = "0")]
        timeout_secs: u64,
    },
    /// Watch live governor samples
    Monitor {
        /// Stop after this many samples (default: until Ctrl-C)
        #[arg(long)]
        ticks: Option<u64>,
        /// Sample interval override in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
    },
    /// Print the effective configuration as TOML
    Config,
}

fn parse_args(args: &[String]) -> Result<ToolArgs> {
    parse_arg_pairs(args)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn zone_color(zone: Zone) -> &'static str {
    match zone {
        Zone::Green => "\x1b[32m",
        Zone::Yellow => "\x1b[33m",
        Zone::Orange => "\x1b[38;5;208m",
        Zone::Red => "\x1b[31m",
        Zone::Critical => "\x1b[1;31m",
    }
}

pub fn show_classification(
    orchestrator: &Orchestrator,
    tool: &str,
    args: &[String],
    json: bool,
) -> Result<()> {
    let args = parse_args(args)?;
    let descriptor = orchestrator.classifier().classify(tool, &args);
    if json {
        return print_json(&descriptor);
    }

    let domains: Vec<&str> = descriptor.domains.iter().map(|d| d.as_str()).collect();
    let operations: Vec<&str> = descriptor.operations.iter().map(|o| o.as_str()).collect();
    println!("tool:        {}", descriptor.tool_id);
    println!(
        "complexity:  {:.2} ({})",
        descriptor.complexity_score, descriptor.complexity_level
    );
    println!("domains:     {}", domains.join(", "));
    println!("operations:  {}", operations.join(", "));
    println!("confidence:  {:.2}", descriptor.confidence);
    println!("risk:        {:.2}", descriptor.risk_score);
    println!("priority:    {}", descriptor.priority());
    println!(
        "estimate:    {} tokens, {}ms, {}MB",
        descriptor.resource_estimate.tokens,
        descriptor.resource_estimate.time_ms,
        descriptor.resource_estimate.memory_mb
    );
    println!("workers:     {}", descriptor.suggested_workers.join(", "));
    println!("scope:       {}", descriptor.scope_size);
    println!(
        "eligible:    wave={} parallel={}",
        descriptor.wave_eligible, descriptor.parallel_eligible
    );
    Ok(())
}

pub fn show_route(
    orchestrator: &Orchestrator,
    tool: &str,
    args: &[String],
    json: bool,
) -> Result<()> {
    let args = parse_args(args)?;
    let (_, decision) = orchestrator.route(tool, &args);
    if json {
        return print_json(&decision);
    }

    println!("strategy:    {}", decision.strategy);
    println!("priority:    {}", decision.priority);
    println!("order:       {}", decision.ordered_workers.join(" -> "));
    for (worker, fallbacks) in &decision.fallback_workers {
        println!("fallback:    {worker} => {}", fallbacks.join(", "));
    }
    println!(
        "flags:       parallel={} cache={} validation={}",
        decision.parallel_allowed, decision.cache_enabled, decision.requires_validation
    );
    Ok(())
}

pub fn show_plan(
    orchestrator: &Orchestrator,
    tool: &str,
    args: &[String],
    json: bool,
) -> Result<()> {
    let args = parse_args(args)?;
    let Some(plan) = orchestrator.plan(tool, &args) else {
        println!("{tool}: below wave thresholds; runs as a single fan-out");
        return Ok(());
    };
    if json {
        return print_json(&plan);
    }

    println!("plan {} ({})", plan.id, plan.strategy);
    for wave in &plan.waves {
        let marker = if plan.is_checkpoint(&wave.id) { " [checkpoint]" } else { "" };
        println!(
            "  {} {:<15} risk={:.2} workers={}{}",
            wave.id,
            wave.stage.as_str(),
            wave.risk_level,
            wave.workers().join(","),
            marker
        );
    }
    println!(
        "estimate: {} tokens, {}ms, risk {:.2}",
        plan.estimated_tokens, plan.estimated_duration_ms, plan.risk_assessment.level
    );
    for factor in &plan.risk_assessment.factors {
        println!("  risk factor: {factor}");
    }
    Ok(())
}

pub fn show_zones(json: bool) -> Result<()> {
    if json {
        let zones: Vec<_> = Zone::ALL
            .iter()
            .map(|z| {
                serde_json::json!({
                    "zone": z.to_string(),
                    "from": z.lower_bound(),
                    "to": z.upper_bound(),
                    "allowed": z.allowed_actions(),
                    "restrictions": z.restrictions(),
                })
            })
            .collect();
        return print_json(&zones);
    }

    for zone in Zone::ALL {
        println!(
            "{}{:<9}\x1b[0m {:>5.1}% - {:>5.1}%  allows: {}",
            zone_color(zone),
            zone.to_string(),
            zone.lower_bound(),
            zone.upper_bound(),
            zone.allowed_actions().join(", ")
        );
        if !zone.restrictions().is_empty() {
            println!("          restricts: {}", zone.restrictions().join(", "));
        }
    }
    Ok(())
}

/// Pipeline against the echo bridge; every bundled worker answers with its inputs
pub fn demo_orchestrator(config: &AppConfig) -> Result<Orchestrator> {
    Orchestrator::from_config(config, Arc::new(StaticBridge::echo()))
}

fn print_outcome(outcome: &OrchestrationOutcome) {
    println!("request {} -> {}", outcome.request_id, outcome.status);
    if let Some(reason) = &outcome.reason {
        println!("  reason: {reason}");
    }
    println!(
        "  zone {} ({:.1}%), {} tokens, {}ms",
        outcome.admission.zone, outcome.admission.usage, outcome.tokens_used, outcome.duration_ms
    );
    if let Some(plan) = &outcome.plan {
        println!(
            "  plan {} ({}): executed {} skipped {} checkpoints {}",
            plan.plan_id,
            plan.strategy,
            plan.executed.join(","),
            plan.skipped.join(","),
            plan.checkpoints.join(",")
        );
    }
    let validations = [
        ("pre-flight", &outcome.preflight),
        ("post-flight", &outcome.postflight),
    ];
    for (name, validation) in validations {
        if let Some(v) = validation {
            println!(
                "  {name}: score {:.1} passed={} retention {:.0}",
                v.overall_score, v.passed, v.context_retention
            );
        }
    }
    for key in outcome.outputs.keys() {
        println!("  output: {key}");
    }
    for failure in &outcome.failures {
        println!("  \x1b[31mfailed\x1b[0m: {} ({})", failure.worker, failure.errors.join("; "));
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn run_request(
    orchestrator: &Orchestrator,
    tool: &str,
    args: &[String],
    session: &str,
    user: &str,
    token_budget: u64,
    timeout_secs: u64,
    json: bool,
) -> Result<()> {
    let args = parse_args(args)?;
    let context = ValidationContext::complete(session, user, token_budget).with_history(tool);
    orchestrator.governor().refresh();

    let cancel = CancellationToken::new();
    if timeout_secs > 0 {
        let timer = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(timeout_secs)).await;
            timer.cancel();
        });
    }

    let outcome = orchestrator.handle(tool, args, &context, &cancel).await?;
    if json {
        print_json(&outcome)
    } else {
        print_outcome(&outcome);
        Ok(())
    }
}

fn print_view(view: &GovernorView, json: bool) -> Result<()> {
    if json {
        return print_json(view);
    }
    let s = &view.snapshot;
    println!(
        "{} {}{:<8}\x1b[0m {:>5.1}%  cpu {:>5.1} mem {:>5.1} tok {:>5.1} rate {:>5.1} chain {:>5.1}",
        view.updated_at.format("%H:%M:%S"),
        zone_color(view.zone),
        view.zone.to_string(),
        view.usage,
        s.cpu_pct,
        s.memory_pct,
        s.token_pct,
        s.rate_limit_pct,
        s.chain_congestion_pct
    );
    Ok(())
}

pub async fn monitor(
    config: &AppConfig,
    ticks: Option<u64>,
    interval_ms: Option<u64>,
    json: bool,
) -> Result<()> {
    let mut governor_config = config.governor.clone();
    if let Some(ms) = interval_ms {
        governor_config.sample_interval_ms = ms;
    }
    let interval = governor_config.sample_interval();
    let governor = Arc::new(ResourceGovernor::new(governor_config));
    let mut views = governor.subscribe_view();
    governor.start_monitoring(interval);

    let mut seen = 0u64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                print_view(&view, json)?;
                seen += 1;
                if ticks.is_some_and(|limit| seen >= limit) {
                    break;
                }
            }
        }
    }

    governor.stop();
    Ok(())
}

pub fn show_config(config: &AppConfig) -> Result<()> {
    print!("{}", config.to_toml()?);
    if let Err(problems) = config.validate() {
        for problem in problems {
            eprintln!("\x1b[33mwarning\x1b[0m: {problem}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ComplexityLevel;

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "sextant", "run", "token_price", "symbol=ETH", "limit=5", "--session", "s1", "--json",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Some(Commands::Run { tool, args, session, token_budget, .. }) => {
                assert_eq!(tool, "token_price");
                assert_eq!(args, vec!["symbol=ETH", "limit=5"]);
                assert_eq!(session, "s1");
                assert_eq!(token_budget, 100_000);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_cli_rejects_bad_pair() {
        assert!(parse_args(&["no-equals-sign".to_string()]).is_err());
    }

    #[tokio::test]
    async fn test_demo_orchestrator_classifies() {
        let orchestrator = demo_orchestrator(&AppConfig::default()).unwrap();
        let args = parse_args(&["symbol=ETH".to_string()]).unwrap();
        let descriptor = orchestrator.classifier().classify("token_price", &args);
        assert_eq!(descriptor.complexity_level, ComplexityLevel::Simple);
    }
}
