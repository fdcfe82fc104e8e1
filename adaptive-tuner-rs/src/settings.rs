// adaptive-tuner-rs/src/settings.rs
// Runtime settings for the control loop, read from TUNER_* variables.

use std::path::PathBuf;
use std::time::Duration;

use config_rs::{env_flag, env_opt_path, env_parse, env_path};

use crate::analyzer::AnalyzerThresholds;
use crate::executor::ExecutorSettings;
use crate::history::{DEFAULT_CAPACITY, DEFAULT_MIN_SAMPLES};
use crate::model::RiskTolerance;

pub const DEFAULT_CONFIG_PATH: &str = "data/adaptive-tuner/configuration.json";
pub const DEFAULT_LEDGER_PATH: &str = "data/adaptive-tuner/optimization_ledger.ndjson";
pub const DEFAULT_METRICS_PATH: &str = "data/adaptive-tuner/metrics.json";

#[derive(Debug, Clone)]
pub struct TunerSettings {
    /// When false, cycles are skipped.
    pub enabled: bool,
    pub risk_tolerance: RiskTolerance,
    pub cycle_interval: Duration,
    pub analysis_interval: Duration,
    pub history_capacity: usize,
    pub min_samples: usize,
    pub target_latency_secs: f64,
    pub max_actions: usize,
    pub settle: Duration,
    pub action_timeout: Duration,
    pub loop_backoff: Duration,
    pub stop_grace: Duration,
    pub config_path: PathBuf,
    pub ledger_path: PathBuf,
    pub telemetry_path: Option<PathBuf>,
    pub metrics_path: PathBuf,
    pub log_json: bool,
    pub thresholds: AnalyzerThresholds,
}

impl Default for TunerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            risk_tolerance: RiskTolerance::Moderate,
            cycle_interval: Duration::from_secs(3600),
            analysis_interval: Duration::from_secs(3600),
            history_capacity: DEFAULT_CAPACITY,
            min_samples: DEFAULT_MIN_SAMPLES,
            target_latency_secs: 3.0,
            max_actions: 3,
            settle: Duration::from_millis(2000),
            action_timeout: Duration::from_secs(30),
            loop_backoff: Duration::from_secs(60),
            stop_grace: Duration::from_secs(10),
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            ledger_path: PathBuf::from(DEFAULT_LEDGER_PATH),
            telemetry_path: None,
            metrics_path: PathBuf::from(DEFAULT_METRICS_PATH),
            log_json: false,
            thresholds: AnalyzerThresholds::default(),
        }
    }
}

impl TunerSettings {
    /// Construct settings from environment variables.
    ///
    /// Never panics: unset variables use the defaults and invalid ones are
    /// logged and replaced by the default.
    pub fn from_env() -> Self {
        let d = Self::default();

        Self {
            enabled: env_flag("TUNER_ENABLED", d.enabled),
            risk_tolerance: env_parse("TUNER_RISK_TOLERANCE", d.risk_tolerance),
            cycle_interval: Duration::from_secs(
                env_parse("TUNER_CYCLE_INTERVAL_SECS", d.cycle_interval.as_secs()).max(1),
            ),
            analysis_interval: Duration::from_secs(env_parse(
                "TUNER_ANALYSIS_INTERVAL_SECS",
                d.analysis_interval.as_secs(),
            )),
            history_capacity: env_parse("TUNER_HISTORY_CAPACITY", d.history_capacity).max(1),
            min_samples: env_parse("TUNER_MIN_SAMPLES", d.min_samples),
            target_latency_secs: env_parse("TUNER_TARGET_LATENCY_SECS", d.target_latency_secs),
            max_actions: env_parse("TUNER_MAX_ACTIONS", d.max_actions),
            settle: Duration::from_millis(env_parse(
                "TUNER_SETTLE_MILLIS",
                d.settle.as_millis() as u64,
            )),
            action_timeout: Duration::from_secs(
                env_parse("TUNER_ACTION_TIMEOUT_SECS", d.action_timeout.as_secs()).max(1),
            ),
            loop_backoff: Duration::from_secs(env_parse(
                "TUNER_LOOP_BACKOFF_SECS",
                d.loop_backoff.as_secs(),
            )),
            stop_grace: Duration::from_secs(env_parse(
                "TUNER_STOP_GRACE_SECS",
                d.stop_grace.as_secs(),
            )),
            config_path: env_path("TUNER_CONFIG_PATH", DEFAULT_CONFIG_PATH),
            ledger_path: env_path("TUNER_LEDGER_PATH", DEFAULT_LEDGER_PATH),
            telemetry_path: env_opt_path("TUNER_TELEMETRY_PATH"),
            metrics_path: env_path("TUNER_METRICS_PATH", DEFAULT_METRICS_PATH),
            log_json: env_flag("TUNER_LOG_JSON", d.log_json),
            thresholds: d.thresholds,
        }
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            settle: self.settle,
            action_timeout: self.action_timeout,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    // One test touches the process environment so parallel tests cannot race.
    #[test]
    fn from_env_reads_overrides_and_recovers_from_garbage() {
        env::set_var("TUNER_ENABLED", "off");
        env::set_var("TUNER_RISK_TOLERANCE", "aggressive");
        env::set_var("TUNER_MAX_ACTIONS", "five");
        env::set_var("TUNER_SETTLE_MILLIS", "250");
        env::set_var("TUNER_TELEMETRY_PATH", "  ");

        let settings = TunerSettings::from_env();
        assert!(!settings.enabled);
        assert_eq!(settings.risk_tolerance, RiskTolerance::Aggressive);
        assert_eq!(settings.max_actions, 3);
        assert_eq!(settings.settle, Duration::from_millis(250));
        assert!(settings.telemetry_path.is_none());
        assert_eq!(settings.executor_settings().settle, Duration::from_millis(250));
        assert_eq!(settings.executor_settings().rollback_threshold, -0.05);

        for var in [
            "TUNER_ENABLED",
            "TUNER_RISK_TOLERANCE",
            "TUNER_MAX_ACTIONS",
            "TUNER_SETTLE_MILLIS",
            "TUNER_TELEMETRY_PATH",
        ] {
            env::remove_var(var);
        }

        let defaults = TunerSettings::from_env();
        assert!(defaults.enabled);
        assert_eq!(defaults.risk_tolerance, RiskTolerance::Moderate);
        assert_eq!(defaults.config_path, PathBuf::from(DEFAULT_CONFIG_PATH));
    }
}
