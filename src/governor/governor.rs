//! Resource governor
//!
//! Owns the live resource view, answers admission queries, and runs zone-entry
//! hooks on transitions. The monitoring task is the only writer of the
//! sampled view; readers go through a `watch` channel and never hold a lock
//! across an admission decision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::predictor::{Forecast, UsagePredictor};
use super::probe::{ProbeReading, ResourceProbe, SystemProbe};
use super::snapshot::{sanitize, ResourceSnapshot};
use super::zone::Zone;
use crate::domain::{ComplexityLevel, Priority, RequestDescriptor};

const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Governor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Monitoring tick interval
    pub sample_interval_ms: u64,
    /// Snapshots kept for trend analysis
    pub history_capacity: usize,
    /// Most recent snapshots used for the least-squares fit
    pub trend_window: usize,
    pub look_ahead_ms: u64,
    /// Minimum forecast confidence before a prediction is acted on
    pub prediction_confidence: f64,
    pub token_budget: u64,
    pub time_budget_ms: u64,
    pub memory_budget_mb: u64,
    /// Memory kept free beyond any request's estimate
    pub memory_headroom_mb: u64,
    /// Operations per rolling minute that count as 100% rate-limit usage
    pub rate_limit_per_minute: u64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 1_000,
            history_capacity: 100,
            trend_window: 10,
            look_ahead_ms: 30_000,
            prediction_confidence: 0.75,
            token_budget: 1_000_000,
            time_budget_ms: 3_600_000,
            memory_budget_mb: 4_096,
            memory_headroom_mb: 50,
            rate_limit_per_minute: 600,
        }
    }
}

impl GovernorConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(1))
    }
}

/// Result of an admission query. A refusal is retry-later, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Admission {
    pub allowed: bool,
    pub reason: Option<String>,
    pub zone: Zone,
    pub usage: f64,
}

impl Admission {
    fn allow(zone: Zone, usage: f64) -> Self {
        Self {
            allowed: true,
            reason: None,
            zone,
            usage,
        }
    }

    fn refuse(zone: Zone, usage: f64, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            zone,
            usage,
        }
    }
}

/// Published governor state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernorView {
    pub snapshot: ResourceSnapshot,
    pub zone: Zone,
    pub usage: f64,
    pub updated_at: DateTime<Utc>,
}

impl GovernorView {
    fn from_snapshot(snapshot: ResourceSnapshot) -> Self {
        let usage = snapshot.overall_usage();
        Self {
            zone: Zone::from_usage(usage),
            usage,
            updated_at: snapshot.taken_at,
            snapshot,
        }
    }
}

/// Event emitted by the governor
#[derive(Debug, Clone)]
pub enum GovernorEvent {
    /// Recorded zone changed on a monitoring tick
    ZoneTransition {
        from: Zone,
        to: Zone,
        snapshot: ResourceSnapshot,
    },
    /// Confident forecast of a different zone
    Prediction { current: Zone, forecast: Forecast },
}

/// Passed to zone-entry hooks
#[derive(Debug, Clone)]
pub struct ZoneEntry {
    pub zone: Zone,
    pub previous: Zone,
    pub snapshot: ResourceSnapshot,
    /// True when triggered by a forecast rather than a recorded transition
    pub predicted: bool,
}

pub type ZoneHook = Arc<dyn Fn(&ZoneEntry) + Send + Sync>;

#[derive(Clone)]
enum HookScope {
    Exactly(Zone),
    AtOrAbove(Zone),
}

impl HookScope {
    fn applies_to(&self, zone: Zone) -> bool {
        match self {
            HookScope::Exactly(z) => *z == zone,
            HookScope::AtOrAbove(min) => zone >= *min,
        }
    }
}

#[derive(Clone)]
struct RegisteredHook {
    name: String,
    scope: HookScope,
    hook: ZoneHook,
}

/// Cumulative usage since the last reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub tokens_used: u64,
    pub time_used_ms: u64,
    pub operations: u64,
}

pub struct ResourceGovernor {
    config: GovernorConfig,
    probe: Arc<dyn ResourceProbe>,
    view_tx: watch::Sender<GovernorView>,
    event_tx: broadcast::Sender<GovernorEvent>,
    hooks: RwLock<Vec<RegisteredHook>>,
    predictor: Mutex<UsagePredictor>,
    last_reading: Mutex<ProbeReading>,
    recorded_zone: Mutex<Zone>,
    last_preempted: Mutex<Option<Zone>>,
    tokens_used: AtomicU64,
    time_used_ms: AtomicU64,
    operations: AtomicU64,
    op_window: Mutex<VecDeque<Instant>>,
    monitor: Mutex<Option<CancellationToken>>,
}

impl ResourceGovernor {
    /// Governor backed by the host `/proc` probe
    pub fn new(config: GovernorConfig) -> Self {
        let probe = Arc::new(SystemProbe::new(config.memory_budget_mb));
        Self::with_probe(config, probe)
    }

    pub fn with_probe(config: GovernorConfig, probe: Arc<dyn ResourceProbe>) -> Self {
        let (view_tx, _) = watch::channel(GovernorView::from_snapshot(ResourceSnapshot::default()));
        let (event_tx, _) = broadcast::channel(64);
        let predictor = UsagePredictor::new(
            config.history_capacity,
            config.trend_window,
            config.look_ahead_ms,
            config.sample_interval_ms,
        );

        Self {
            config,
            probe,
            view_tx,
            event_tx,
            hooks: RwLock::new(Vec::new()),
            predictor: Mutex::new(predictor),
            last_reading: Mutex::new(ProbeReading::default()),
            recorded_zone: Mutex::new(Zone::Green),
            last_preempted: Mutex::new(None),
            tokens_used: AtomicU64::new(0),
            time_used_ms: AtomicU64::new(0),
            operations: AtomicU64::new(0),
            op_window: Mutex::new(VecDeque::new()),
            monitor: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> ResourceSnapshot {
        self.view_tx.borrow().snapshot.clone()
    }

    pub fn view(&self) -> GovernorView {
        self.view_tx.borrow().clone()
    }

    pub fn zone(&self) -> Zone {
        self.view_tx.borrow().zone
    }

    pub fn zone_of(snapshot: &ResourceSnapshot) -> Zone {
        snapshot.zone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GovernorEvent> {
        self.event_tx.subscribe()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<GovernorView> {
        self.view_tx.subscribe()
    }

    /// Run `hook` whenever `zone` is entered
    pub fn register_zone_hook<F>(&self, zone: Zone, name: impl Into<String>, hook: F)
    where
        F: Fn(&ZoneEntry) + Send + Sync + 'static,
    {
        self.push_hook(HookScope::Exactly(zone), name.into(), Arc::new(hook));
    }

    /// Run `hook` whenever `min` or any worse zone is entered
    pub fn register_zone_hook_at_or_above<F>(&self, min: Zone, name: impl Into<String>, hook: F)
    where
        F: Fn(&ZoneEntry) + Send + Sync + 'static,
    {
        self.push_hook(HookScope::AtOrAbove(min), name.into(), Arc::new(hook));
    }

    fn push_hook(&self, scope: HookScope, name: String, hook: ZoneHook) {
        debug!(hook = %name, "zone hook registered");
        self.hooks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(RegisteredHook { name, scope, hook });
    }

    /// Admission check for one request
    pub fn admit(&self, descriptor: &RequestDescriptor) -> Admission {
        let view = self.view();
        let (zone, usage) = (view.zone, view.usage);
        let priority = descriptor.priority();

        let admission = match zone {
            Zone::Critical if priority != Priority::Critical => Admission::refuse(
                zone,
                usage,
                format!("{zone} zone: only critical-priority requests are admitted"),
            ),
            Zone::Critical => Admission::allow(zone, usage),
            Zone::Red if descriptor.complexity_level == ComplexityLevel::Complex => {
                Admission::refuse(
                    zone,
                    usage,
                    format!("{zone} zone: complex requests are deferred"),
                )
            }
            Zone::Red => Admission::allow(zone, usage),
            Zone::Orange if priority == Priority::Low => Admission::refuse(
                zone,
                usage,
                format!("{zone} zone: low-priority requests are deferred"),
            ),
            Zone::Orange => Admission::allow(zone, usage),
            Zone::Green | Zone::Yellow => match self.budget_shortfall(descriptor, &view.snapshot) {
                Some(reason) => Admission::refuse(zone, usage, reason),
                None => Admission::allow(zone, usage),
            },
        };

        if !admission.allowed {
            debug!(
                tool = %descriptor.tool_id,
                zone = %zone,
                usage = format!("{usage:.1}"),
                reason = admission.reason.as_deref().unwrap_or(""),
                "admission refused"
            );
        }
        admission
    }

    fn budget_shortfall(
        &self,
        descriptor: &RequestDescriptor,
        snapshot: &ResourceSnapshot,
    ) -> Option<String> {
        let estimate = &descriptor.resource_estimate;

        let tokens_left = self
            .config
            .token_budget
            .saturating_sub(self.tokens_used.load(Ordering::Relaxed));
        if tokens_left < estimate.tokens {
            return Some(format!(
                "token budget exhausted: {tokens_left} left, {} needed",
                estimate.tokens
            ));
        }

        let time_left = self
            .config
            .time_budget_ms
            .saturating_sub(self.time_used_ms.load(Ordering::Relaxed));
        if time_left < estimate.time_ms {
            return Some(format!(
                "time budget exhausted: {time_left}ms left, {}ms needed",
                estimate.time_ms
            ));
        }

        let free_ratio = 1.0 - sanitize(snapshot.memory_pct) / 100.0;
        let memory_left = self.config.memory_budget_mb as f64 * free_ratio
            - self.config.memory_headroom_mb as f64;
        if memory_left < estimate.memory_mb as f64 {
            return Some(format!(
                "insufficient memory: {memory_left:.0}MB available after headroom, {}MB needed",
                estimate.memory_mb
            ));
        }

        None
    }

    /// Account one completed operation. Safe to call concurrently.
    pub fn report_usage(&self, tokens: u64, time_ms: u64) {
        self.tokens_used.fetch_add(tokens, Ordering::Relaxed);
        self.time_used_ms.fetch_add(time_ms, Ordering::Relaxed);
        self.operations.fetch_add(1, Ordering::Relaxed);
        self.op_window
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Instant::now());

        // Incremental update between ticks; transitions are only recorded on ticks
        let reading = *self.last_reading.lock().unwrap_or_else(|e| e.into_inner());
        let snapshot = self.compose(&reading);
        self.view_tx.send_replace(GovernorView::from_snapshot(snapshot));
    }

    pub fn usage_totals(&self) -> UsageTotals {
        UsageTotals {
            tokens_used: self.tokens_used.load(Ordering::Relaxed),
            time_used_ms: self.time_used_ms.load(Ordering::Relaxed),
            operations: self.operations.load(Ordering::Relaxed),
        }
    }

    /// Start a new budget window
    pub fn reset_usage(&self) {
        self.tokens_used.store(0, Ordering::Relaxed);
        self.time_used_ms.store(0, Ordering::Relaxed);
        self.operations.store(0, Ordering::Relaxed);
        self.op_window
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();

        let reading = *self.last_reading.lock().unwrap_or_else(|e| e.into_inner());
        self.view_tx
            .send_replace(GovernorView::from_snapshot(self.compose(&reading)));
        info!("usage counters reset");
    }

    fn ops_last_minute(&self) -> usize {
        let mut window = self.op_window.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        while let Some(front) = window.front() {
            if now.duration_since(*front) > RATE_WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }
        window.len()
    }

    fn compose(&self, reading: &ProbeReading) -> ResourceSnapshot {
        let token_pct = reading.token_pct.unwrap_or_else(|| {
            if self.config.token_budget == 0 {
                0.0
            } else {
                self.tokens_used.load(Ordering::Relaxed) as f64 / self.config.token_budget as f64
                    * 100.0
            }
        });
        let rate_limit_pct = reading.rate_limit_pct.unwrap_or_else(|| {
            if self.config.rate_limit_per_minute == 0 {
                0.0
            } else {
                self.ops_last_minute() as f64 / self.config.rate_limit_per_minute as f64 * 100.0
            }
        });

        ResourceSnapshot {
            cpu_pct: sanitize(reading.cpu_pct.unwrap_or(0.0)),
            memory_pct: sanitize(reading.memory_pct.unwrap_or(0.0)),
            token_pct: sanitize(token_pct),
            rate_limit_pct: sanitize(rate_limit_pct),
            chain_congestion_pct: sanitize(reading.chain_congestion_pct.unwrap_or(0.0)),
            taken_at: Utc::now(),
        }
    }

    /// One monitoring tick: sample, publish, detect transitions, forecast
    pub fn refresh(&self) -> ResourceSnapshot {
        let reading = self.probe.sample();
        *self.last_reading.lock().unwrap_or_else(|e| e.into_inner()) = reading;

        let snapshot = self.compose(&reading);
        let view = GovernorView::from_snapshot(snapshot.clone());
        let zone = view.zone;
        self.view_tx.send_replace(view);

        let previous = std::mem::replace(
            &mut *self.recorded_zone.lock().unwrap_or_else(|e| e.into_inner()),
            zone,
        );
        if previous != zone {
            let usage = format!("{:.1}", snapshot.overall_usage());
            if zone.is_worse_than(previous) {
                warn!(from = %previous, to = %zone, usage = %usage, "zone transition");
            } else {
                info!(from = %previous, to = %zone, usage = %usage, "zone transition");
            }
            *self.last_preempted.lock().unwrap_or_else(|e| e.into_inner()) = None;
            self.run_hooks(&ZoneEntry {
                zone,
                previous,
                snapshot: snapshot.clone(),
                predicted: false,
            });
            let _ = self.event_tx.send(GovernorEvent::ZoneTransition {
                from: previous,
                to: zone,
                snapshot: snapshot.clone(),
            });
        }

        let forecast = {
            let mut predictor = self.predictor.lock().unwrap_or_else(|e| e.into_inner());
            predictor.record(snapshot.clone());
            predictor.forecast()
        };
        if let Some(forecast) = forecast {
            self.act_on_forecast(zone, &snapshot, forecast);
        }

        snapshot
    }

    fn act_on_forecast(&self, zone: Zone, snapshot: &ResourceSnapshot, forecast: Forecast) {
        let confident = forecast.confidence >= self.config.prediction_confidence;
        if !confident || forecast.projected_zone == zone {
            *self.last_preempted.lock().unwrap_or_else(|e| e.into_inner()) = None;
            return;
        }

        let projected = forecast.projected_zone;
        info!(
            current = %zone,
            projected = %projected,
            confidence = format!("{:.2}", forecast.confidence),
            look_ahead_ms = forecast.look_ahead_ms,
            "zone forecast"
        );
        let _ = self.event_tx.send(GovernorEvent::Prediction {
            current: zone,
            forecast,
        });

        if !projected.is_worse_than(zone) {
            *self.last_preempted.lock().unwrap_or_else(|e| e.into_inner()) = None;
            return;
        }

        let already = {
            let mut last = self.last_preempted.lock().unwrap_or_else(|e| e.into_inner());
            let already = *last == Some(projected);
            *last = Some(projected);
            already
        };
        if !already {
            debug!(zone = %projected, "pre-emptive zone hooks");
            self.run_hooks(&ZoneEntry {
                zone: projected,
                previous: zone,
                snapshot: snapshot.clone(),
                predicted: true,
            });
        }
    }

    fn run_hooks(&self, entry: &ZoneEntry) {
        let matching: Vec<RegisteredHook> = self
            .hooks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|h| h.scope.applies_to(entry.zone))
            .cloned()
            .collect();

        for registered in matching {
            let outcome =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (registered.hook)(entry)));
            if outcome.is_err() {
                warn!(hook = %registered.name, zone = %entry.zone, "zone hook panicked");
            }
        }
    }

    /// Spawn the monitoring loop. Returns false if it is already running.
    pub fn start_monitoring(self: &Arc<Self>, interval: Duration) -> bool {
        let token = {
            let mut slot = self.monitor.lock().unwrap_or_else(|e| e.into_inner());
            if slot.as_ref().is_some_and(|t| !t.is_cancelled()) {
                return false;
            }
            let token = CancellationToken::new();
            *slot = Some(token.clone());
            token
        };

        let weak = Arc::downgrade(self);
        let interval = interval.max(Duration::from_millis(1));
        info!(interval_ms = interval.as_millis() as u64, "resource monitoring started");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(governor) = weak.upgrade() else { break };
                        governor.refresh();
                    }
                }
            }
            debug!("resource monitoring loop exited");
        });
        true
    }

    pub fn stop(&self) {
        if let Some(token) = self
            .monitor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            token.cancel();
            info!("resource monitoring stopped");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|t| !t.is_cancelled())
    }
}

impl Drop for ResourceGovernor {
    fn drop(&mut self) {
        if let Some(token) = self
            .monitor
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ResourceEstimate, ToolArgs};
    use crate::governor::ManualProbe;
    use std::collections::BTreeSet;
    use std::sync::atomic::AtomicUsize;

    fn descriptor(priority_score: f64, complexity_score: f64) -> RequestDescriptor {
        RequestDescriptor {
            tool_id: "market_overview".into(),
            args: ToolArgs::new(),
            complexity_score,
            complexity_level: ComplexityLevel::from_score(complexity_score),
            domains: BTreeSet::new(),
            operations: BTreeSet::new(),
            confidence: 0.8,
            risk_score: 0.1,
            priority_score,
            resource_estimate: ResourceEstimate::new(2_000, 2_000, 64),
            suggested_workers: vec!["market_agent".into()],
            wave_eligible: false,
            parallel_eligible: false,
            scope_size: 1,
            realtime: false,
        }
    }

    fn governor_at(pct: f64) -> (Arc<ManualProbe>, ResourceGovernor) {
        let probe = Arc::new(ManualProbe::uniform(pct));
        let governor = ResourceGovernor::with_probe(GovernorConfig::default(), probe.clone());
        governor.refresh();
        (probe, governor)
    }

    #[test]
    fn test_orange_rejects_low_priority_only() {
        let (_, governor) = governor_at(84.0);
        assert_eq!(governor.zone(), Zone::Orange);

        let low = governor.admit(&descriptor(0.1, 0.2));
        assert!(!low.allowed);
        assert!(low.reason.is_some());
        assert!(governor.admit(&descriptor(0.5, 0.2)).allowed);
    }

    #[test]
    fn test_critical_admits_only_critical() {
        let (_, governor) = governor_at(96.0);
        assert_eq!(governor.zone(), Zone::Critical);
        assert!(!governor.admit(&descriptor(0.75, 0.2)).allowed);
        assert!(governor.admit(&descriptor(0.95, 0.9)).allowed);
    }

    #[test]
    fn test_red_rejects_complex() {
        let (_, governor) = governor_at(90.0);
        assert!(!governor.admit(&descriptor(0.5, 0.8)).allowed);
        assert!(governor.admit(&descriptor(0.1, 0.5)).allowed);
    }

    #[test]
    fn test_budget_checked_below_orange() {
        let probe = Arc::new(ManualProbe::new(ProbeReading {
            cpu_pct: Some(10.0),
            memory_pct: Some(10.0),
            ..ProbeReading::default()
        }));
        let config = GovernorConfig {
            token_budget: 10_000,
            ..GovernorConfig::default()
        };
        let governor = ResourceGovernor::with_probe(config, probe);
        governor.refresh();

        assert!(governor.admit(&descriptor(0.5, 0.2)).allowed);
        governor.report_usage(9_000, 100);
        let refused = governor.admit(&descriptor(0.5, 0.2));
        assert!(!refused.allowed);
        assert!(refused.reason.unwrap_or_default().contains("token"));

        governor.reset_usage();
        assert!(governor.admit(&descriptor(0.5, 0.2)).allowed);
    }

    #[test]
    fn test_memory_headroom() {
        let probe = Arc::new(ManualProbe::new(ProbeReading {
            memory_pct: Some(50.0),
            ..ProbeReading::default()
        }));
        let config = GovernorConfig {
            memory_budget_mb: 200,
            ..GovernorConfig::default()
        };
        let governor = ResourceGovernor::with_probe(config, probe);
        governor.refresh();

        // 200 * 0.5 - 50 = 50MB available, 64MB needed
        let admission = governor.admit(&descriptor(0.5, 0.2));
        assert!(!admission.allowed);
        assert!(admission.reason.unwrap_or_default().contains("memory"));
    }

    #[test]
    fn test_unmeasurable_inputs_fail_open() {
        let probe = Arc::new(ManualProbe::new(ProbeReading {
            cpu_pct: Some(f64::NAN),
            ..ProbeReading::default()
        }));
        let governor = ResourceGovernor::with_probe(GovernorConfig::default(), probe);
        let snapshot = governor.refresh();
        assert_eq!(snapshot.cpu_pct, 0.0);
        assert_eq!(governor.zone(), Zone::Green);
    }

    #[test]
    fn test_usage_updates_view_between_ticks() {
        let probe = Arc::new(ManualProbe::new(ProbeReading::default()));
        let config = GovernorConfig {
            token_budget: 1_000,
            ..GovernorConfig::default()
        };
        let governor = ResourceGovernor::with_probe(config, probe);
        governor.refresh();
        assert_eq!(governor.snapshot().token_pct, 0.0);

        governor.report_usage(500, 10);
        assert!((governor.snapshot().token_pct - 50.0).abs() < 1e-9);
        assert!(governor.snapshot().rate_limit_pct > 0.0);
        assert_eq!(governor.usage_totals().operations, 1);
    }

    #[test]
    fn test_transition_runs_hooks_in_order_and_emits_event() {
        let probe = Arc::new(ManualProbe::uniform(10.0));
        // forecasts never confident enough to pre-empt
        let config = GovernorConfig {
            prediction_confidence: 1.5,
            ..GovernorConfig::default()
        };
        let governor = ResourceGovernor::with_probe(config, probe.clone());
        governor.refresh();
        let mut events = governor.subscribe();
        let order = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second"] {
            let order = order.clone();
            governor.register_zone_hook(Zone::Orange, name, move |entry| {
                assert!(!entry.predicted);
                order.lock().unwrap().push(name);
            });
        }
        let order_red = order.clone();
        governor.register_zone_hook_at_or_above(Zone::Red, "red+", move |_| {
            order_red.lock().unwrap().push("red+");
        });

        probe.set_uniform(80.0);
        governor.refresh();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);

        match events.try_recv() {
            Ok(GovernorEvent::ZoneTransition { from, to, .. }) => {
                assert_eq!(from, Zone::Green);
                assert_eq!(to, Zone::Orange);
            }
            other => panic!("expected transition, got {other:?}"),
        }

        // same zone again: no hooks
        governor.refresh();
        assert_eq!(order.lock().unwrap().len(), 2);

        probe.set_uniform(97.0);
        governor.refresh();
        assert_eq!(order.lock().unwrap().last(), Some(&"red+"));
    }

    #[test]
    fn test_panicking_hook_does_not_stop_others() {
        let (probe, governor) = governor_at(10.0);
        let ran = Arc::new(AtomicUsize::new(0));
        governor.register_zone_hook(Zone::Yellow, "boom", |_| panic!("hook failure"));
        let counter = ran.clone();
        governor.register_zone_hook(Zone::Yellow, "count", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        probe.set_uniform(65.0);
        governor.refresh();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_confident_forecast_preempts_once() {
        let probe = Arc::new(ManualProbe::uniform(50.0));
        let config = GovernorConfig {
            look_ahead_ms: 3_000,
            sample_interval_ms: 1_000,
            ..GovernorConfig::default()
        };
        let governor = ResourceGovernor::with_probe(config, probe.clone());
        let mut events = governor.subscribe();

        let preempted = Arc::new(AtomicUsize::new(0));
        let counter = preempted.clone();
        governor.register_zone_hook(Zone::Orange, "compact", move |entry| {
            assert!(entry.predicted);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        for pct in [52.0, 56.0, 61.0, 65.0, 70.0] {
            probe.set_uniform(pct);
            governor.refresh();
        }

        assert_eq!(preempted.load(Ordering::SeqCst), 1);
        // forecast never changes the recorded zone
        assert_eq!(governor.zone(), Zone::Yellow);

        let mut predictions = 0;
        while let Ok(event) = events.try_recv() {
            if let GovernorEvent::Prediction { current, forecast } = event {
                assert_eq!(current, Zone::Yellow);
                assert_eq!(forecast.projected_zone, Zone::Orange);
                predictions += 1;
            }
        }
        assert_eq!(predictions, 2);
    }

    #[test]
    fn test_concurrent_usage_reports_are_not_lost() {
        let governor = Arc::new(ResourceGovernor::with_probe(
            GovernorConfig::default(),
            Arc::new(ManualProbe::default()),
        ));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let g = governor.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        g.report_usage(10, 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let totals = governor.usage_totals();
        assert_eq!(totals.tokens_used, 8_000);
        assert_eq!(totals.time_used_ms, 800);
        assert_eq!(totals.operations, 800);
    }

    #[tokio::test]
    async fn test_monitoring_lifecycle() {
        let probe = Arc::new(ManualProbe::uniform(10.0));
        let governor = Arc::new(ResourceGovernor::with_probe(
            GovernorConfig::default(),
            probe.clone(),
        ));
        let mut view = governor.subscribe_view();

        assert!(governor.start_monitoring(Duration::from_millis(10)));
        assert!(!governor.start_monitoring(Duration::from_millis(10)));
        assert!(governor.is_monitoring());

        probe.set_uniform(70.0);
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if view.borrow_and_update().zone == Zone::Yellow {
                    break;
                }
                if view.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(governor.zone(), Zone::Yellow);

        governor.stop();
        assert!(!governor.is_monitoring());
        assert!(governor.start_monitoring(Duration::from_millis(10)));
        governor.stop();
    }
}
