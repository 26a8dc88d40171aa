//! Process configuration, read from the environment.
//!
//! Every variable has a default so a bare `queuey-api` talks to a local Redis.
//! Values that are present but unparsable are an error rather than silently
//! falling back.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use queuey_core::BackoffPolicy;

use crate::jobs::{
    RetryMode, WorkerConfig, DEFAULT_DEDUPE_WINDOW, DEFAULT_LEASE_TTL, DEFAULT_SWEEP_INTERVAL,
};
use crate::store::StoreBackend;

pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379/0";
pub const DEFAULT_API_KEY: &str = "dev";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    pub store: StoreBackend,
    pub redis_url: String,
    pub api_key: String,
    pub bind_addr: String,
    pub worker_concurrency: usize,
    pub poll_timeout: Duration,
    pub error_pause: Duration,
    pub lease_ttl: Duration,
    pub watchdog_interval: Duration,
    pub dedupe_window: Duration,
    pub retry_mode: RetryMode,
    pub backoff: BackoffPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            store: StoreBackend::Redis,
            redis_url: DEFAULT_REDIS_URL.to_string(),
            api_key: DEFAULT_API_KEY.to_string(),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            worker_concurrency: 4,
            poll_timeout: Duration::from_secs(2),
            error_pause: Duration::from_secs(1),
            lease_ttl: DEFAULT_LEASE_TTL,
            watchdog_interval: DEFAULT_SWEEP_INTERVAL,
            dedupe_window: DEFAULT_DEDUPE_WINDOW,
            retry_mode: RetryMode::Scheduled,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl QueueConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Self::default();
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let store = match get("QUEUEY_STORE") {
            None => d.store,
            Some(v) => match v.trim().to_ascii_lowercase().as_str() {
                "redis" => StoreBackend::Redis,
                "memory" => StoreBackend::Memory,
                _ => return Err(invalid("QUEUEY_STORE", v)),
            },
        };
        let retry_mode = match get("RETRY_MODE") {
            None => d.retry_mode,
            Some(v) => match v.trim().to_ascii_lowercase().as_str() {
                "scheduled" => RetryMode::Scheduled,
                "inline" => RetryMode::Inline,
                _ => return Err(invalid("RETRY_MODE", v)),
            },
        };

        let api_key = get("API_KEY").unwrap_or(d.api_key);
        if api_key == DEFAULT_API_KEY {
            warn!("API_KEY not set; using the development key");
        }

        let worker_concurrency = parse(&get, "WORKER_CONCURRENCY", d.worker_concurrency)?;
        if worker_concurrency == 0 {
            return Err(invalid("WORKER_CONCURRENCY", "0".to_string()));
        }
        let lease_ttl = nonzero_secs(&get, "LEASE_TTL_SECS", d.lease_ttl)?;
        let watchdog_interval = nonzero_secs(&get, "WATCHDOG_INTERVAL_SECS", d.watchdog_interval)?;
        let dedupe_window = nonzero_secs(&get, "DEDUPE_WINDOW_SECS", d.dedupe_window)?;

        let backoff = BackoffPolicy::new(
            millis(&get, "BACKOFF_BASE_MS", d.backoff.base)?,
            millis(&get, "BACKOFF_CAP_MS", d.backoff.cap)?,
            millis(&get, "BACKOFF_JITTER_MS", d.backoff.jitter)?,
        );

        Ok(Self {
            store,
            redis_url: get("REDIS_URL").unwrap_or(d.redis_url),
            api_key,
            bind_addr: get("BIND_ADDR").unwrap_or(d.bind_addr),
            worker_concurrency,
            poll_timeout: millis(&get, "WORKER_POLL_TIMEOUT_MS", d.poll_timeout)?,
            error_pause: millis(&get, "WORKER_ERROR_PAUSE_MS", d.error_pause)?,
            lease_ttl,
            watchdog_interval,
            dedupe_window,
            retry_mode,
            backoff,
        })
    }

    pub fn worker_config(&self, name: impl Into<String>) -> WorkerConfig {
        WorkerConfig {
            name: name.into(),
            poll_timeout: self.poll_timeout,
            error_pause: self.error_pause,
            retry_mode: self.retry_mode,
            backoff: self.backoff,
            lease_ttl: self.lease_ttl,
            ..WorkerConfig::default()
        }
    }
}

fn invalid(var: &'static str, value: String) -> ConfigError {
    ConfigError::Invalid { var, value }
}

fn parse<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(var) {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|_| invalid(var, v)),
    }
}

fn millis(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match get(var) {
        None => Ok(default),
        Some(_) => parse(get, var, 0u64).map(Duration::from_millis),
    }
}

fn secs(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match get(var) {
        None => Ok(default),
        Some(_) => parse(get, var, 0u64).map(Duration::from_secs),
    }
}

/// Like [`secs`], for TTLs and intervals where zero would expire markers on
/// write or spin a loop.
fn nonzero_secs(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let value = secs(get, var, default)?;
    if value.is_zero() {
        return Err(invalid(var, "0".to_string()));
    }
    Ok(value)
}
