use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TicklerError};

/// Top-level config (tickler.toml + TICKLER_* env overrides).
///
/// Nested keys use a double underscore in the environment, e.g.
/// `TICKLER_DATABASE__PATH` or `TICKLER_SCHEDULER__HEARTBEAT_SECS`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TicklerConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Milliseconds a connection waits on a locked database before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// When set, `tickler run` keeps a recurring `heartbeat` job firing at
    /// this interval.
    #[serde(default)]
    pub heartbeat_secs: Option<u64>,
    /// How often `tickler run` re-reads the earliest due date, so jobs added
    /// by other processes (e.g. `tickler add`) get armed.
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: None,
            refresh_secs: default_refresh_secs(),
        }
    }
}

impl SchedulerConfig {
    /// Refresh period, never shorter than one second.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs.max(1))
    }

    pub fn heartbeat(&self) -> Option<Duration> {
        self.heartbeat_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.tickler/tickler.db", home)
}

fn default_busy_timeout_ms() -> u64 {
    3000
}

fn default_refresh_secs() -> u64 {
    5
}

impl TicklerConfig {
    /// Load config from a TOML file with TICKLER_* env var overrides.
    ///
    /// Without an explicit path, `~/.tickler/tickler.toml` is read if present.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::from_figment(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("TICKLER_").split("__")),
        )
    }

    fn from_figment(figment: Figment) -> Result<Self> {
        figment
            .extract()
            .map_err(|e| TicklerError::Config(e.to_string()))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.tickler/tickler.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_source_yields_defaults() {
        let config = TicklerConfig::from_figment(Figment::new()).unwrap();
        assert!(config.database.path.ends_with(".tickler/tickler.db"));
        assert_eq!(config.database.busy_timeout_ms, 3000);
        assert_eq!(config.scheduler.heartbeat(), None);
        assert_eq!(config.scheduler.refresh_interval(), Duration::from_secs(5));
    }

    #[test]
    fn toml_sections_override_defaults() {
        let config = TicklerConfig::from_figment(Figment::new().merge(Toml::string(
            r#"
            [database]
            path = "/var/lib/tickler/jobs.db"

            [scheduler]
            heartbeat_secs = 30
            refresh_secs = 2
            "#,
        )))
        .unwrap();
        assert_eq!(config.database.path, "/var/lib/tickler/jobs.db");
        assert_eq!(config.database.busy_timeout_ms, 3000);
        assert_eq!(config.scheduler.heartbeat(), Some(Duration::from_secs(30)));
        assert_eq!(config.scheduler.refresh_interval(), Duration::from_secs(2));
    }

    #[test]
    fn zero_heartbeat_is_disabled_and_refresh_is_clamped() {
        let scheduler = SchedulerConfig {
            heartbeat_secs: Some(0),
            refresh_secs: 0,
        };
        assert_eq!(scheduler.heartbeat(), None);
        assert_eq!(scheduler.refresh_interval(), Duration::from_secs(1));
    }

    #[test]
    fn wrong_types_are_config_errors() {
        let err = TicklerConfig::from_figment(
            Figment::new().merge(Toml::string("[scheduler]\nheartbeat_secs = \"soon\"")),
        )
        .unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
