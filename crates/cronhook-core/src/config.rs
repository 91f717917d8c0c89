use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_WORKERS: usize = 5;
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:5173";

/// Top-level config (cronhook.toml + CRONHOOK_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CronhookConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

/// HTTP API listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Origins allowed by the CORS layer. Empty disables CORS headers.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            cors_origins: default_cors_origins(),
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

/// Dispatch engine tuning. Read once at startup; never reloaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Seconds between due-task polls. Bounds how late a task can fire.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Number of concurrent callback workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Capacity of the hand-off queue between the poller and the workers.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Client-level timeout applied to every outbound callback.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl DispatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Reject values that would leave the engine unable to make progress.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(invalid("dispatch.poll_interval_secs must be at least 1"));
        }
        if self.workers == 0 {
            return Err(invalid("dispatch.workers must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("dispatch.queue_capacity must be at least 1"));
        }
        if self.request_timeout_secs == 0 {
            return Err(invalid("dispatch.request_timeout_secs must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> crate::error::CronhookError {
    crate::error::CronhookError::Config(msg.to_string())
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_cors_origins() -> Vec<String> {
    vec![DEFAULT_CORS_ORIGIN.to_string()]
}
fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_workers() -> usize {
    DEFAULT_WORKERS
}
fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}
fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronhook/cronhook.db", home)
}

impl CronhookConfig {
    /// Load config from a TOML file with CRONHOOK_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g. `CRONHOOK_DISPATCH__WORKERS=8`.
    /// A missing file is not an error: defaults plus env overrides apply.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::figment(&path)
            .merge(Env::prefixed("CRONHOOK_").split("__"))
            .extract::<CronhookConfig>()
            .map_err(|e| crate::error::CronhookError::Config(e.to_string()))
            .and_then(|config| {
                config.dispatch.validate()?;
                Ok(config)
            })
    }

    fn figment(path: &str) -> Figment {
        Figment::from(Serialized::defaults(CronhookConfig::default())).merge(Toml::file(path))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronhook/cronhook.toml", home)
}
