//! Application configuration loaded from environment variables.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use channel_sync::{RateLimitConfig, SyncConfig};
use common::ChannelId;
use inventory::{ConflictConfig, ResolutionStrategy};
use saga::ExecutorConfig;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `pretty` or `json`
/// - `DATABASE_URL`: selects the Postgres event transport when set
/// - `WEBHOOK_BASE_URL`: public URL channels call back on
/// - `ADAPTER_TIMEOUT_SECS` (30)
/// - `RATE_LIMIT_DEFAULT` (100), `RATE_LIMIT_WINDOW_SECS` (60)
/// - `CONFLICT_MAJOR_THRESHOLD` (10), `CONFLICT_STRATEGY` (`last_write_wins`)
/// - `CHANNEL_PRIORITY_RANKS`, e.g. `shopify=1,amazon=2`
/// - `SAGA_STEP_TIMEOUT_SECS`: unset means no step timeout
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub webhook_base_url: Option<String>,
    pub adapter_timeout: Duration,
    pub rate_limit: RateLimitConfig,
    pub conflict: ConflictConfig,
    pub executor: ExecutorConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to
    /// defaults for unset keys.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut rate_limit = defaults.rate_limit.clone();
        if let Some(limit) = parse(&get, "RATE_LIMIT_DEFAULT")? {
            rate_limit.default_limit = limit;
        }
        if let Some(secs) = parse(&get, "RATE_LIMIT_WINDOW_SECS")? {
            rate_limit.window_secs = secs;
        }

        let mut conflict = defaults.conflict.clone();
        if let Some(threshold) = parse(&get, "CONFLICT_MAJOR_THRESHOLD")? {
            conflict.major_threshold = threshold;
        }
        if let Some(strategy) = parse::<ResolutionStrategy, _>(&get, "CONFLICT_STRATEGY")? {
            conflict.default_strategy = strategy;
        }
        if let Some(ranks) = get("CHANNEL_PRIORITY_RANKS") {
            conflict.priority_ranks = parse_ranks(&ranks)?;
        }

        let executor = match parse::<u64, _>(&get, "SAGA_STEP_TIMEOUT_SECS")? {
            Some(secs) => ExecutorConfig::with_step_timeout(Duration::from_secs(secs)),
            None => defaults.executor,
        };

        Ok(Self {
            host: get("HOST").unwrap_or(defaults.host),
            port: parse(&get, "PORT")?.unwrap_or(defaults.port),
            log_level: get("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: parse(&get, "LOG_FORMAT")?.unwrap_or(defaults.log_format),
            database_url: get("DATABASE_URL"),
            webhook_base_url: get("WEBHOOK_BASE_URL"),
            adapter_timeout: parse(&get, "ADAPTER_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.adapter_timeout),
            rate_limit,
            conflict,
            executor,
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            adapter_timeout_ms: self.adapter_timeout.as_millis() as u64,
            webhook_base_url: self.webhook_base_url.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            database_url: None,
            webhook_base_url: None,
            adapter_timeout: Duration::from_secs(30),
            rate_limit: RateLimitConfig::default(),
            conflict: ConflictConfig::default(),
            executor: ExecutorConfig::default(),
        }
    }
}

fn parse<T, G>(get: &G, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|value| {
            value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                value: value.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

/// Parses `channel=rank` pairs separated by commas.
fn parse_ranks(value: &str) -> Result<HashMap<ChannelId, u32>, ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        key: "CHANNEL_PRIORITY_RANKS",
        value: value.to_string(),
        reason: reason.to_string(),
    };

    value
        .split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (channel, rank) = pair
                .split_once('=')
                .ok_or_else(|| invalid("expected channel=rank"))?;
            let rank = rank
                .trim()
                .parse::<u32>()
                .map_err(|_| invalid("rank must be a non-negative integer"))?;
            Ok((ChannelId::new(channel.trim()), rank))
        })
        .collect()
}
