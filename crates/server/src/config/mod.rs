mod logging;
mod queue;
mod retention;
mod server;
mod store;


pub use logging::*;
pub use queue::*;
pub use retention::*;
pub use server::*;
pub use store::*;

use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::ServerError;

/// Environment variable overriding `retention.horizon_days`.
pub const ENV_RETENTION_DAYS: &str = "JEJAK_RETENTION_DAYS";
/// Environment variable overriding `queue.enabled`.
pub const ENV_USE_QUEUE: &str = "JEJAK_USE_QUEUE";
/// Environment variable overriding `queue.batch_size`.
pub const ENV_QUEUE_BATCH_SIZE: &str = "JEJAK_QUEUE_BATCH_SIZE";
/// Environment variable overriding `queue.flush_interval_ms`.
pub const ENV_QUEUE_FLUSH_INTERVAL_MS: &str = "JEJAK_QUEUE_FLUSH_INTERVAL_MS";
/// Environment variable overriding `retention.delete_batch_size`.
pub const ENV_RETENTION_BATCH_SIZE: &str = "JEJAK_RETENTION_BATCH_SIZE";
/// Environment variable overriding `retention.schedule`.
pub const ENV_RETENTION_SCHEDULE: &str = "JEJAK_RETENTION_SCHEDULE";
/// Environment variable overriding `store.url`.
pub const ENV_STORE_URL: &str = "JEJAK_STORE_URL";

/// Top-level configuration for the Jejak server, loaded from a TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JejakConfig {
    /// HTTP server bind configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Audit store backend.
    #[serde(default)]
    pub store: StoreConfig,
    /// Write-behind queue.
    #[serde(default)]
    pub queue: QueueSettings,
    /// Retention pruner.
    #[serde(default)]
    pub retention: RetentionSettings,
    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl JejakConfig {
    /// Load configuration from `path`, apply environment overrides and validate.
    ///
    /// A missing file yields the defaults. The returned flag reports whether
    /// the file was found.
    pub fn load(path: impl AsRef<Path>) -> Result<(Self, bool), ServerError> {
        let path = path.as_ref();
        let found = path.exists();
        let mut config = if found {
            let contents = std::fs::read_to_string(path)?;
            Self::from_toml(&contents)?
        } else {
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok((config, found))
    }

    /// Parse a TOML document. Missing sections and keys take their defaults.
    pub fn from_toml(contents: &str) -> Result<Self, ServerError> {
        toml::from_str(contents).map_err(|e| ServerError::Config(format!("invalid config: {e}")))
    }

    /// Apply `JEJAK_*` overrides using `lookup` to read variables.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ServerError> {
        if let Some(raw) = lookup(ENV_RETENTION_DAYS) {
            self.retention.horizon_days = parse_env(ENV_RETENTION_DAYS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_USE_QUEUE) {
            self.queue.enabled = parse_bool(ENV_USE_QUEUE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_QUEUE_BATCH_SIZE) {
            self.queue.batch_size = parse_env(ENV_QUEUE_BATCH_SIZE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_QUEUE_FLUSH_INTERVAL_MS) {
            self.queue.flush_interval_ms = parse_env(ENV_QUEUE_FLUSH_INTERVAL_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_RETENTION_BATCH_SIZE) {
            self.retention.delete_batch_size = parse_env(ENV_RETENTION_BATCH_SIZE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_RETENTION_SCHEDULE) {
            self.retention.schedule = raw.trim().to_owned();
        }
        if let Some(raw) = lookup(ENV_STORE_URL) {
            self.store.url = Some(raw);
        }
        Ok(())
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ServerError> {
        match self.store.backend.as_str() {
            "memory" => {}
            "postgres" => {
                if self.store.url.as_deref().is_none_or(str::is_empty) {
                    return Err(ServerError::Config(
                        "store backend 'postgres' requires [store] url".into(),
                    ));
                }
            }
            other => {
                return Err(ServerError::Config(format!(
                    "unknown store backend '{other}' (expected 'memory' or 'postgres')"
                )));
            }
        }

        self.queue
            .to_queue_config()
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;
        self.retention
            .to_retention_config()
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;

        match self.logging.format.as_str() {
            "plain" | "json" => Ok(()),
            other => Err(ServerError::Config(format!(
                "unknown logging format '{other}' (expected 'plain' or 'json')"
            ))),
        }
    }
}

fn parse_env<T>(key: &str, raw: &str) -> Result<T, ServerError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ServerError::Config(format!("invalid {key}='{raw}': {e}")))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ServerError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ServerError::Config(format!(
            "invalid {key}='{raw}': expected true or false"
        ))),
    }
}
