use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::classifier::ClassifierConfig;
use crate::error::SextantError;
use crate::governor::GovernorConfig;
use crate::quality::QualityConfig;
use crate::scheduler::SchedulerConfig;
use crate::waves::WaveConfig;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub governor: GovernorConfig,
    #[serde(default = "SchedulerConfig::standard")]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub waves: WaveConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierConfig::default(),
            governor: GovernorConfig::default(),
            scheduler: SchedulerConfig::standard(),
            waves: WaveConfig::default(),
            quality: QualityConfig::default(),
            orchestrator: OrchestratorSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Request pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Per-attempt worker time limit (0 = unlimited)
    pub worker_timeout_ms: u64,
    /// TTL of cached bridge responses
    pub bridge_cache_ttl_secs: u64,
    /// How long past the TTL a cached response may stand in for a failed fetch
    pub bridge_stale_secs: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            worker_timeout_ms: 30_000,
            bridge_cache_ttl_secs: 30,
            bridge_stale_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load from `config_dir` and reject values that fail [`AppConfig::validate`]
    pub fn load_validated<P: AsRef<Path>>(config_dir: P) -> crate::error::Result<Self> {
        let config = Self::load_from(config_dir)?;
        if let Err(problems) = config.validate() {
            return Err(SextantError::InvalidConfig(problems.join("; ")));
        }
        Ok(config)
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();
        let env = std::env::var("SEXTANT_ENV").unwrap_or_else(|_| "development".to_string());

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(File::from(config_dir.join(env)).required(false))
            // Override with environment variables (SEXTANT_GOVERNOR__TOKEN_BUDGET, etc.)
            .add_source(
                Environment::with_prefix("SEXTANT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> crate::error::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let gov = &self.governor;
        if gov.sample_interval_ms == 0 {
            errors.push("governor.sample_interval_ms must be positive".to_string());
        }
        if gov.history_capacity < 3 {
            errors.push("governor.history_capacity must be at least 3".to_string());
        }
        if gov.trend_window < 3 || gov.trend_window > gov.history_capacity {
            errors.push("governor.trend_window must be between 3 and history_capacity".to_string());
        }
        if !(0.0..=1.0).contains(&gov.prediction_confidence) {
            errors.push("governor.prediction_confidence must be between 0 and 1".to_string());
        }
        for (name, value) in [
            ("token_budget", gov.token_budget),
            ("time_budget_ms", gov.time_budget_ms),
            ("memory_budget_mb", gov.memory_budget_mb),
            ("rate_limit_per_minute", gov.rate_limit_per_minute),
        ] {
            if value == 0 {
                errors.push(format!("governor.{name} must be positive"));
            }
        }
        if gov.memory_headroom_mb >= gov.memory_budget_mb {
            errors.push("governor.memory_headroom_mb must be below memory_budget_mb".to_string());
        }

        if !(0.0..=1.0).contains(&self.waves.complexity_threshold) {
            errors.push("waves.complexity_threshold must be between 0 and 1".to_string());
        }
        if self.waves.max_admission_backoff_ms < self.waves.admission_backoff_ms {
            errors.push(
                "waves.max_admission_backoff_ms should not be below admission_backoff_ms".to_string(),
            );
        }

        for (step, threshold) in self.quality.thresholds.entries() {
            if !(0.0..=100.0).contains(&threshold) {
                errors.push(format!("quality threshold for {step} must be between 0 and 100"));
            }
        }
        if !(0.0..=100.0).contains(&self.quality.min_context_retention) {
            errors.push("quality.min_context_retention must be between 0 and 100".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ExecutionStrategy;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.scheduler.tools.get("trade_executor").and_then(|r| r.strategy),
            Some(ExecutionStrategy::Sequential)
        );
    }

    #[test]
    fn test_validate_collects_every_error() {
        let mut config = AppConfig::default();
        config.governor.prediction_confidence = 1.5;
        config.governor.token_budget = 0;
        config.quality.thresholds.security_check = 120.0;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("token_budget")));
        assert!(errors.iter().any(|e| e.contains("security_check")));
    }

    #[test]
    fn test_load_from_missing_dir_uses_defaults() {
        let config = AppConfig::load_from("does/not/exist").unwrap();
        assert_eq!(config.governor.sample_interval_ms, 1_000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_validated_rejects_bad_values() {
        let dir = std::env::temp_dir().join(format!("sextant-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("default.toml"), "[governor]\ntoken_budget = 0\n").unwrap();

        let result = AppConfig::load_validated(&dir);
        let _ = std::fs::remove_dir_all(&dir);
        match result {
            Err(SextantError::InvalidConfig(problems)) => {
                assert!(problems.contains("token_budget"))
            }
            other => panic!("expected invalid config, got {other:?}"),
        }
        assert!(AppConfig::load_validated("does/not/exist").is_ok());
    }

    #[test]
    fn test_toml_round_trip() {
        let rendered = AppConfig::default().to_toml().unwrap();
        let parsed: AppConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.quality.cache_ttl_secs, 60);
        assert_eq!(parsed.scheduler.tools.len(), 3);
    }
}
