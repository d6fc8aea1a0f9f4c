use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8088;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_MAX_CATCH_UP_RUNS: u32 = 1000;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 300; // live retry after a failed occurrence

/// Top-level config (opsdesk.toml + OPSDESK_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OpsdeskConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// How a definition's recurrence state advances after a successful run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulePolicy {
    /// Advance from the scheduled slot. Every missed slot runs once and the
    /// cadence stays on the anchor's grid no matter how late a run was.
    #[default]
    FixedGrid,
    /// Advance from the actual run time. A late run shifts every later
    /// occurrence by the same delay and a backlog collapses into one run.
    DriftForward,
}

impl std::fmt::Display for SchedulePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulePolicy::FixedGrid => f.write_str("fixed_grid"),
            SchedulePolicy::DriftForward => f.write_str("drift_forward"),
        }
    }
}

/// Recurrence scheduler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub policy: SchedulePolicy,
    /// Upper bound on executions performed by a single catch-up drain.
    #[serde(default = "default_max_catch_up_runs")]
    pub max_catch_up_runs: u32,
    /// Delay before a failed live occurrence is attempted again.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            policy: SchedulePolicy::default(),
            max_catch_up_runs: DEFAULT_MAX_CATCH_UP_RUNS,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_max_catch_up_runs() -> u32 {
    DEFAULT_MAX_CATCH_UP_RUNS
}
fn default_retry_delay_secs() -> u64 {
    DEFAULT_RETRY_DELAY_SECS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.opsdesk/opsdesk.db", home)
}

impl OpsdeskConfig {
    /// Load config from a TOML file with OPSDESK_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `OPSDESK_SCHEDULER__RETRY_DELAY_SECS=60`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: OpsdeskConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("OPSDESK_").split("__"))
            .extract()
            .map_err(|e| crate::error::OpsdeskError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.opsdesk/opsdesk.toml", home)
}
