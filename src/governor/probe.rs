//! Resource probes
//!
//! A probe reports whatever it can measure. Anything it leaves as `None` is
//! filled from the governor's own counters (tokens, rate limit) or treated
//! as 0% (cpu, memory, chain congestion).

use std::sync::RwLock;

/// Raw probe reading, percentages in [0,100]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProbeReading {
    pub cpu_pct: Option<f64>,
    pub memory_pct: Option<f64>,
    /// Overrides the governor's token accounting when set
    pub token_pct: Option<f64>,
    /// Overrides the governor's rate window when set
    pub rate_limit_pct: Option<f64>,
    pub chain_congestion_pct: Option<f64>,
}

impl ProbeReading {
    pub fn uniform(pct: f64) -> Self {
        Self {
            cpu_pct: Some(pct),
            memory_pct: Some(pct),
            token_pct: Some(pct),
            rate_limit_pct: Some(pct),
            chain_congestion_pct: Some(pct),
        }
    }
}

/// Source of host/network pressure measurements
pub trait ResourceProbe: Send + Sync {
    fn sample(&self) -> ProbeReading;
}

/// Reads load average and resident memory from `/proc`.
///
/// Only cpu and memory are measured; on hosts without `/proc` both read as
/// `None`.
#[derive(Debug, Clone)]
pub struct SystemProbe {
    memory_budget_mb: u64,
    cores: f64,
}

impl SystemProbe {
    pub fn new(memory_budget_mb: u64) -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get() as f64)
            .unwrap_or(1.0);
        Self {
            memory_budget_mb,
            cores,
        }
    }

    fn cpu_pct(&self) -> Option<f64> {
        let raw = std::fs::read_to_string("/proc/loadavg").ok()?;
        let load_1m: f64 = raw.split_whitespace().next()?.parse().ok()?;
        Some((load_1m / self.cores * 100.0).clamp(0.0, 100.0))
    }

    fn memory_pct(&self) -> Option<f64> {
        if self.memory_budget_mb == 0 {
            return None;
        }
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        let rss_kb: f64 = status
            .lines()
            .find(|line| line.starts_with("VmRSS:"))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()?;
        let budget_kb = self.memory_budget_mb as f64 * 1024.0;
        Some((rss_kb / budget_kb * 100.0).clamp(0.0, 100.0))
    }
}

impl ResourceProbe for SystemProbe {
    fn sample(&self) -> ProbeReading {
        ProbeReading {
            cpu_pct: self.cpu_pct(),
            memory_pct: self.memory_pct(),
            token_pct: None,
            rate_limit_pct: None,
            chain_congestion_pct: None,
        }
    }
}

/// Probe whose values are set from outside: simulations, tests, or an
/// external chain-congestion feed.
#[derive(Debug, Default)]
pub struct ManualProbe {
    reading: RwLock<ProbeReading>,
}

impl ManualProbe {
    pub fn new(reading: ProbeReading) -> Self {
        Self {
            reading: RwLock::new(reading),
        }
    }

    pub fn uniform(pct: f64) -> Self {
        Self::new(ProbeReading::uniform(pct))
    }

    pub fn set(&self, reading: ProbeReading) {
        *self.reading.write().unwrap_or_else(|e| e.into_inner()) = reading;
    }

    pub fn set_uniform(&self, pct: f64) {
        self.set(ProbeReading::uniform(pct));
    }

    pub fn set_chain_congestion(&self, pct: f64) {
        self.reading
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .chain_congestion_pct = Some(pct);
    }
}

impl ResourceProbe for ManualProbe {
    fn sample(&self) -> ProbeReading {
        *self.reading.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_probe_updates() {
        let probe = ManualProbe::uniform(10.0);
        assert_eq!(probe.sample().cpu_pct, Some(10.0));

        probe.set_chain_congestion(70.0);
        let reading = probe.sample();
        assert_eq!(reading.chain_congestion_pct, Some(70.0));
        assert_eq!(reading.memory_pct, Some(10.0));
    }

    #[test]
    fn test_system_probe_stays_in_range() {
        let reading = SystemProbe::new(4096).sample();
        for pct in [reading.cpu_pct, reading.memory_pct].into_iter().flatten() {
            assert!((0.0..=100.0).contains(&pct));
        }
        assert!(reading.token_pct.is_none());
    }
}
