//! TOML configuration for opsdesk.
//!
//! Configuration is read once at startup and handed to each component as an
//! immutable value. Resolution order: an explicit `--config` path, the
//! `OPSDESK_CONFIG` environment variable, `/etc/opsdesk/opsdesk.toml`, then
//! compiled-in defaults. A handful of runner settings can be overridden from
//! the environment after the file is loaded.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::reconcile::schedule::ReconcileSchedule;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "OPSDESK_CONFIG";

const SYSTEM_CONFIG_PATH: &str = "/etc/opsdesk/opsdesk.toml";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("runner.base_url must not be empty")]
    MissingRunnerUrl,

    #[error("reconcile.schedule '{expr}' is not a valid cron expression: {reason}")]
    InvalidSchedule { expr: String, reason: String },

    #[error("reconcile.lookback_days must be at least 1")]
    ZeroLookback,

    #[error("reconcile.max_in_flight must be at least 1")]
    ZeroInFlight,
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the opsdesk process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub form: FormConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded opsdesk configuration");
        Ok(config)
    }

    /// Resolve the configuration for this process.
    ///
    /// An explicit path must load; the env var and system locations fall back
    /// to defaults with a warning. Environment overrides are applied last.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => Self::load_or_default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "OPSDESK_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Apply `RUNDECK_API_URL`, `RUNDECK_API_TOKEN` and
    /// `RUNDECK_UPDATE_INTERVAL` on top of the file values.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("RUNDECK_API_URL").filter(|v| !v.trim().is_empty()) {
            self.runner.base_url = url;
        }
        if let Some(token) = lookup("RUNDECK_API_TOKEN") {
            self.runner.api_token = token;
        }
        if let Some(schedule) = lookup("RUNDECK_UPDATE_INTERVAL").filter(|v| !v.trim().is_empty()) {
            self.reconcile.schedule = schedule;
        }
    }

    /// Check the values the daemon cannot run without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runner.base_url.trim().is_empty() {
            return Err(ConfigError::MissingRunnerUrl);
        }
        if let Err(e) = ReconcileSchedule::parse(&self.reconcile.schedule) {
            return Err(ConfigError::InvalidSchedule {
                expr: self.reconcile.schedule.clone(),
                reason: e.to_string(),
            });
        }
        if self.reconcile.lookback_days == 0 {
            return Err(ConfigError::ZeroLookback);
        }
        if self.reconcile.max_in_flight == 0 {
            return Err(ConfigError::ZeroInFlight);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Server / storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address and port for the HTTP API.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5001".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file.
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/opsdesk.db"),
        }
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Connection settings for the Rundeck API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Versioned API root, e.g. `http://rundeck:4440/api/41`.
    pub base_url: String,
    /// Sent as `X-Rundeck-Auth-Token`.
    pub api_token: String,
    pub request_timeout_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:4440/api/41".to_string(),
            api_token: String::new(),
            request_timeout_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Whether `serve` starts the background loop.
    pub enabled: bool,
    /// Cron expression, 5-field (minute first) or 6-field (second first).
    pub schedule: String,
    /// Only records created within this many days are reconciled.
    pub lookback_days: u32,
    /// Upper bound on concurrent status queries within one pass.
    pub max_in_flight: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: "*/5 * * * *".to_string(),
            lookback_days: 7,
            max_in_flight: 16,
        }
    }
}

// ---------------------------------------------------------------------------
// Jobs / form
// ---------------------------------------------------------------------------

/// Runner job ids used by the change-request form, keyed by change type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub compliance: String,
    pub patching: String,
    pub default: String,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            compliance: "compliance-job-id".to_string(),
            patching: "patching-job-id".to_string(),
            default: "default-job-id".to_string(),
        }
    }
}

/// Options offered by the change-request form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FormConfig {
    pub compliance_rules: Vec<String>,
    pub patching_versions: Vec<String>,
}

impl Default for FormConfig {
    fn default() -> Self {
        Self {
            compliance_rules: vec!["1-1-1".to_string(), "2-2-2".to_string()],
            patching_versions: vec!["90523".to_string(), "85527".to_string()],
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.server.bind, "0.0.0.0:5001");
        assert_eq!(cfg.storage.db_path, PathBuf::from("data/opsdesk.db"));
        assert_eq!(cfg.runner.base_url, "http://localhost:4440/api/41");
        assert!(cfg.runner.api_token.is_empty());
        assert_eq!(cfg.runner.request_timeout_secs, 30);
        assert!(cfg.reconcile.enabled);
        assert_eq!(cfg.reconcile.schedule, "*/5 * * * *");
        assert_eq!(cfg.reconcile.lookback_days, 7);
        assert_eq!(cfg.reconcile.max_in_flight, 16);
        assert_eq!(cfg.jobs.default, "default-job-id");
        assert_eq!(cfg.form.compliance_rules, vec!["1-1-1", "2-2-2"]);
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.logging.format, LogFormat::Pretty);
        assert_eq!(cfg.validate(), Ok(()));
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r#"
[server]
bind = "127.0.0.1:9000"

[storage]
db_path = "/var/lib/opsdesk/opsdesk.db"

[runner]
base_url = "https://rundeck.internal/api/45"
api_token = "secret"
request_timeout_secs = 10

[reconcile]
enabled = false
schedule = "0 */2 * * * *"
lookback_days = 3
max_in_flight = 4

[jobs]
compliance = "c-123"
patching = "p-456"
default = "d-789"

[form]
compliance_rules = ["9-9-9"]
patching_versions = []

[logging]
level = "debug"
format = "json"
"#;

        let cfg: AppConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.server.bind, "127.0.0.1:9000");
        assert_eq!(cfg.storage.db_path, PathBuf::from("/var/lib/opsdesk/opsdesk.db"));
        assert_eq!(cfg.runner.base_url, "https://rundeck.internal/api/45");
        assert_eq!(cfg.runner.api_token, "secret");
        assert_eq!(cfg.runner.request_timeout_secs, 10);
        assert!(!cfg.reconcile.enabled);
        assert_eq!(cfg.reconcile.schedule, "0 */2 * * * *");
        assert_eq!(cfg.reconcile.lookback_days, 3);
        assert_eq!(cfg.reconcile.max_in_flight, 4);
        assert_eq!(cfg.jobs.compliance, "c-123");
        assert_eq!(cfg.form.compliance_rules, vec!["9-9-9"]);
        assert!(cfg.form.patching_versions.is_empty());
        assert_eq!(cfg.logging.format, LogFormat::Json);
        assert_eq!(cfg.validate(), Ok(()));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
[runner]
api_token = "abc"
"#,
        )
        .unwrap();

        assert_eq!(cfg.runner.api_token, "abc");
        assert_eq!(cfg.runner.base_url, "http://localhost:4440/api/41");
        assert_eq!(cfg.reconcile.schedule, "*/5 * * * *");
        assert_eq!(cfg.server.bind, "0.0.0.0:5001");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("RUNDECK_API_URL", "http://rd:4440/api/41"),
            ("RUNDECK_API_TOKEN", "tok"),
            ("RUNDECK_UPDATE_INTERVAL", "*/1 * * * *"),
        ]
        .into_iter()
        .collect();

        let mut cfg = AppConfig::default();
        cfg.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.runner.base_url, "http://rd:4440/api/41");
        assert_eq!(cfg.runner.api_token, "tok");
        assert_eq!(cfg.reconcile.schedule, "*/1 * * * *");
    }

    #[test]
    fn test_blank_env_url_is_ignored() {
        let mut cfg = AppConfig::default();
        cfg.apply_env_overrides(|k| (k == "RUNDECK_API_URL").then(|| "  ".to_string()));
        assert_eq!(cfg.runner.base_url, "http://localhost:4440/api/41");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut cfg = AppConfig::default();
        cfg.runner.base_url = String::new();
        assert_eq!(cfg.validate(), Err(ConfigError::MissingRunnerUrl));

        let mut cfg = AppConfig::default();
        cfg.reconcile.schedule = "every five minutes".to_string();
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidSchedule { .. })));

        let mut cfg = AppConfig::default();
        cfg.reconcile.lookback_days = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroLookback));

        let mut cfg = AppConfig::default();
        cfg.reconcile.max_in_flight = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroInFlight));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("opsdesk.toml");
        std::fs::write(
            &path,
            r#"
[server]
bind = "0.0.0.0:9999"
"#,
        )
        .unwrap();

        let cfg = AppConfig::load(&path).unwrap();
        assert_eq!(cfg.server.bind, "0.0.0.0:9999");
    }

    #[test]
    fn test_explicit_missing_file_errors() {
        let result = AppConfig::resolve(Some(Path::new("/nonexistent/path/opsdesk.toml")));
        assert!(result.is_err());
    }
}
