//! Configuration loading and representation.
//!
//! Every value has a default; `MonitorConfig::from_env` overrides them from
//! `SENTINEL_*` environment variables. Durations are whole seconds.

use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

use crate::provider::MAX_PAGE_SIZE;

/// Prefix shared by every environment variable read here.
pub const ENV_PREFIX: &str = "SENTINEL_";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Parse { key: String, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/complaint_sentinel".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
        }
    }
}

/// Tenant worker and manager timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// How often the manager reconciles the live worker set.
    pub refresh_interval: Duration,
    /// How often each tenant worker polls the provider.
    pub fetch_interval: Duration,
    /// Relaunch a worker whose loop faulted.
    pub restartable: bool,
    pub restart_backoff: Duration,
    /// Outer deadline for one whole tick.
    pub tick_deadline: Duration,
    /// Deadline for each provider call.
    pub call_timeout: Duration,
    pub query_days_back: u32,
    pub page_size: u32,
    /// Weight passed to the coordination lock for every complaint.
    pub lock_weight: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60),
            fetch_interval: Duration::from_secs(2),
            restartable: true,
            restart_backoff: Duration::from_secs(5),
            tick_deadline: Duration::from_secs(60),
            call_timeout: Duration::from_secs(30),
            query_days_back: 10,
            page_size: MAX_PAGE_SIZE,
            lock_weight: 30,
        }
    }
}

impl WorkerConfig {
    pub fn with_fetch_interval(mut self, interval: Duration) -> Self {
        self.fetch_interval = interval;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_restart(mut self, restartable: bool, backoff: Duration) -> Self {
        self.restartable = restartable;
        self.restart_backoff = backoff;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }
}

/// Credential cache settings.
#[derive(Debug, Clone)]
pub struct CredentialConfig {
    pub cache_ttl: Duration,
    pub sweep_interval: Duration,
    /// AES-256 key for stored credential blobs. Any length other than 32
    /// bytes switches decryption to plaintext passthrough.
    pub encryption_key: SecretString,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(300),
            encryption_key: SecretString::from(String::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfig {
    pub base_ttl: Duration,
    pub max_ttl: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            base_ttl: Duration::from_secs(60),
            max_ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub worker: WorkerConfig,
    pub credentials: CredentialConfig,
    pub lock: LockConfig,
    /// Time given to in-flight ticks after shutdown is requested.
    pub shutdown_grace: Duration,
    /// Tracing filter directive; `RUST_LOG` takes precedence.
    pub log_filter: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            redis: RedisConfig::default(),
            worker: WorkerConfig::default(),
            credentials: CredentialConfig::default(),
            lock: LockConfig::default(),
            shutdown_grace: Duration::from_secs(30),
            log_filter: "info".to_string(),
        }
    }
}

impl MonitorConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary lookup (`key` includes the `SENTINEL_` prefix).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);
        let mut cfg = Self::default();

        if let Some(url) = env.string("DATABASE_URL") {
            cfg.database.url = url;
        }
        if let Some(n) = env.parse::<u32>("DATABASE_MAX_CONNECTIONS")? {
            cfg.database.max_connections = n;
        }
        if let Some(url) = env.string("REDIS_URL") {
            cfg.redis.url = url;
        }

        let worker = &mut cfg.worker;
        env.secs("REFRESH_INTERVAL_SECS", &mut worker.refresh_interval)?;
        env.secs("FETCH_INTERVAL_SECS", &mut worker.fetch_interval)?;
        env.secs("RESTART_BACKOFF_SECS", &mut worker.restart_backoff)?;
        env.secs("TICK_DEADLINE_SECS", &mut worker.tick_deadline)?;
        env.secs("CALL_TIMEOUT_SECS", &mut worker.call_timeout)?;
        if let Some(flag) = env.flag("WORKER_RESTARTABLE")? {
            worker.restartable = flag;
        }
        if let Some(days) = env.parse::<u32>("QUERY_DAYS_BACK")? {
            worker.query_days_back = days;
        }
        if let Some(size) = env.parse::<u32>("PAGE_SIZE")? {
            worker.page_size = size;
        }
        if let Some(weight) = env.parse::<u32>("LOCK_WEIGHT")? {
            worker.lock_weight = weight;
        }

        env.secs("LOCK_BASE_TTL_SECS", &mut cfg.lock.base_ttl)?;
        env.secs("LOCK_MAX_TTL_SECS", &mut cfg.lock.max_ttl)?;

        env.secs("CERT_CACHE_TTL_SECS", &mut cfg.credentials.cache_ttl)?;
        env.secs("CERT_SWEEP_INTERVAL_SECS", &mut cfg.credentials.sweep_interval)?;
        if let Some(key) = env.string("CERT_ENCRYPTION_KEY") {
            cfg.credentials.encryption_key = SecretString::from(key);
        }

        env.secs("SHUTDOWN_GRACE_SECS", &mut cfg.shutdown_grace)?;
        if let Some(level) = env.string("LOG_LEVEL") {
            cfg.log_filter = level;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Invalid("database url is empty".into()));
        }
        if self.redis.url.trim().is_empty() {
            return Err(ConfigError::Invalid("redis url is empty".into()));
        }
        if self.worker.page_size == 0 || self.worker.page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::Invalid(format!(
                "page size must be within 1..={MAX_PAGE_SIZE}, got {}",
                self.worker.page_size
            )));
        }
        if self.lock.base_ttl.is_zero() || self.lock.max_ttl < self.lock.base_ttl {
            return Err(ConfigError::Invalid(format!(
                "lock ttl bounds invalid: base {:?}, max {:?}",
                self.lock.base_ttl, self.lock.max_ttl
            )));
        }
        let intervals = [
            ("refresh interval", self.worker.refresh_interval),
            ("fetch interval", self.worker.fetch_interval),
            ("tick deadline", self.worker.tick_deadline),
            ("call timeout", self.worker.call_timeout),
            ("credential sweep interval", self.credentials.sweep_interval),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(&format!("{ENV_PREFIX}{key}"))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(key)
            .map(|raw| {
                raw.parse::<T>().map_err(|e| ConfigError::Parse {
                    key: format!("{ENV_PREFIX}{key}"),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    fn secs(&self, key: &str, target: &mut Duration) -> Result<(), ConfigError> {
        if let Some(secs) = self.parse::<u64>(key)? {
            *target = Duration::from_secs(secs);
        }
        Ok(())
    }

    fn flag(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        match self.string(key).as_deref().map(str::to_ascii_lowercase).as_deref() {
            None => Ok(None),
            Some("true" | "1" | "yes") => Ok(Some(true)),
            Some("false" | "0" | "no") => Ok(Some(false)),
            Some(other) => Err(ConfigError::Parse {
                key: format!("{ENV_PREFIX}{key}"),
                reason: format!("expected a boolean, got {other:?}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<MonitorConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        MonitorConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_environment() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.worker.refresh_interval, Duration::from_secs(60));
        assert_eq!(cfg.worker.fetch_interval, Duration::from_secs(2));
        assert_eq!(cfg.worker.page_size, 200);
        assert_eq!(cfg.worker.lock_weight, 30);
        assert!(cfg.worker.restartable);
        assert_eq!(cfg.lock.base_ttl, Duration::from_secs(60));
        assert_eq!(cfg.lock.max_ttl, Duration::from_secs(300));
        assert_eq!(cfg.credentials.cache_ttl, Duration::from_secs(3600));
        assert_eq!(cfg.shutdown_grace, Duration::from_secs(30));
    }

    #[test]
    fn overrides_are_read() {
        let cfg = load(&[
            ("SENTINEL_DATABASE_URL", "postgres://db/monitor"),
            ("SENTINEL_FETCH_INTERVAL_SECS", "5"),
            ("SENTINEL_WORKER_RESTARTABLE", "false"),
            ("SENTINEL_PAGE_SIZE", "50"),
            ("SENTINEL_CERT_ENCRYPTION_KEY", "0123456789abcdef0123456789abcdef"),
        ])
        .unwrap();
        assert_eq!(cfg.database.url, "postgres://db/monitor");
        assert_eq!(cfg.worker.fetch_interval, Duration::from_secs(5));
        assert!(!cfg.worker.restartable);
        assert_eq!(cfg.worker.page_size, 50);
        assert_eq!(cfg.credentials.encryption_key.expose_secret().len(), 32);
    }

    #[test]
    fn rejects_oversized_pages() {
        let err = load(&[("SENTINEL_PAGE_SIZE", "500")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_inverted_lock_bounds() {
        let err = load(&[
            ("SENTINEL_LOCK_BASE_TTL_SECS", "120"),
            ("SENTINEL_LOCK_MAX_TTL_SECS", "60"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn reports_unparseable_values() {
        let err = load(&[("SENTINEL_CALL_TIMEOUT_SECS", "soon")]).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { key, .. } if key == "SENTINEL_CALL_TIMEOUT_SECS"));

        let err = load(&[("SENTINEL_WORKER_RESTARTABLE", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
