//! Configuration management for charsync using the prefer crate.
//!
//! A config file (discovered by prefer, or passed with `--config`) provides
//! the baseline. Environment variables override it. The result is one
//! immutable [`Settings`] value handed to components at startup.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::fetch::DEFAULT_UPSTREAM_TIMEOUT;
use crate::rate_limit::{QuotaSpec, DEFAULT_STORE_TIMEOUT};

/// Default upstream character endpoint.
pub const DEFAULT_UPSTREAM_ENDPOINT: &str = "https://rickandmortyapi.com/api/character";

/// Default SQLite database.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:charsync.db";

pub const DEFAULT_PORT: u16 = 8080;

/// Default per-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

fn invalid(key: &'static str, message: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key,
        message: message.to_string(),
    }
}

/// Where rate limit counters live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitBackend {
    /// Process-local; each instance enforces its own quota.
    Memory,
    /// The `rate_limit_counters` table in the main database.
    Database,
    /// Redis at the given URL.
    Redis(String),
}

impl RateLimitBackend {
    /// Parse `memory`, `database` (or `sqlite`/`postgres`), or a `redis://` URL.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let value = value.trim();
        match value.to_ascii_lowercase().as_str() {
            "memory" => Ok(RateLimitBackend::Memory),
            "" | "database" | "db" | "sqlite" | "postgres" => Ok(RateLimitBackend::Database),
            lower if lower.starts_with("redis://") || lower.starts_with("rediss://") => {
                Ok(RateLimitBackend::Redis(value.to_string()))
            }
            _ => Err(invalid(
                "rate_limit_backend",
                format!("expected memory, database or a redis:// URL, got {:?}", value),
            )),
        }
    }
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// SQLite path/URL or PostgreSQL URL.
    pub database_url: String,
    pub rate_limit_backend: RateLimitBackend,
    pub quota: QuotaSpec,
    /// Required `X-API-Key` value for `/characters`, if any.
    pub api_key: Option<String>,
    pub upstream_endpoint: Url,
    pub host: String,
    pub port: u16,
    /// Deadline for a whole request.
    pub request_timeout: Duration,
    /// Timeout for a single upstream attempt.
    pub upstream_timeout: Duration,
    /// Timeout for a single counter store round-trip.
    pub store_timeout: Duration,
    /// Overrides the default user agent.
    pub user_agent: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            rate_limit_backend: RateLimitBackend::Database,
            quota: QuotaSpec::default(),
            api_key: None,
            upstream_endpoint: Url::parse(DEFAULT_UPSTREAM_ENDPOINT)
                .expect("default upstream endpoint is a valid URL"),
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            user_agent: None,
        }
    }
}

impl Settings {
    /// Address to bind the HTTP server to.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| invalid("host", e))
    }

    /// Apply environment overrides read through `var`.
    ///
    /// Recognized: `DATABASE_URL`, `RATE_LIMIT_BACKEND`, `REDIS_ADDR`,
    /// `RATE_LIMIT_SPEC`, `API_KEY`, `RM_API_ENDPOINT`, `PORT`,
    /// `REQUEST_TIMEOUT_SECS`. Empty values are ignored.
    pub fn apply_env<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("DATABASE_URL") {
            tracing::debug!("Using DATABASE_URL from environment");
            self.database_url = url;
        }

        if let Some(backend) = get("RATE_LIMIT_BACKEND") {
            tracing::debug!("Using RATE_LIMIT_BACKEND from environment: {}", backend);
            self.rate_limit_backend = RateLimitBackend::parse(&backend)?;
        } else if let Some(addr) = get("REDIS_ADDR") {
            let url = if addr.contains("://") {
                addr
            } else {
                format!("redis://{}", addr)
            };
            self.rate_limit_backend = RateLimitBackend::Redis(url);
        }

        if let Some(spec) = get("RATE_LIMIT_SPEC") {
            self.quota = spec.parse().map_err(|e| invalid("RATE_LIMIT_SPEC", e))?;
        }

        if let Some(key) = get("API_KEY") {
            self.api_key = Some(key);
        }

        if let Some(endpoint) = get("RM_API_ENDPOINT") {
            self.upstream_endpoint =
                Url::parse(&endpoint).map_err(|e| invalid("RM_API_ENDPOINT", e))?;
        }

        if let Some(port) = get("PORT") {
            self.port = port.trim().parse().map_err(|e| invalid("PORT", e))?;
        }

        if let Some(secs) = get("REQUEST_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|e| invalid("REQUEST_TIMEOUT_SECS", e))?;
            self.request_timeout = Duration::from_secs(secs);
        }

        Ok(())
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    /// `memory`, `database` or a `redis://` URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_backend: Option<String>,
    /// Quota such as `"100-M"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Whole-request deadline in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    /// Per-attempt upstream timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_timeout: Option<u64>,
    /// Counter store timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Discover and load a charsync config file with prefer.
    ///
    /// Falls back to defaults when no file is found or it cannot be parsed.
    pub async fn load() -> Self {
        match prefer::load("charsync").await {
            Ok(discovered) => match discovered.source_path() {
                Some(path) => match Self::load_from_path(path).await {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::warn!("Ignoring config file: {}", e);
                        Self::default()
                    }
                },
                None => Self::default(),
            },
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific TOML or JSON file.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
        let parsed: Result<Config, String> = match ext {
            "json" => serde_json::from_str(&contents).map_err(|e| e.to_string()),
            _ => toml::from_str(&contents).map_err(|e| e.to_string()),
        };

        let mut config = parsed.map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Apply file values on top of `settings`.
    pub fn apply_to_settings(&self, settings: &mut Settings) -> Result<(), ConfigError> {
        if let Some(ref url) = self.database_url {
            settings.database_url = url.clone();
        }
        if let Some(ref backend) = self.rate_limit_backend {
            settings.rate_limit_backend = RateLimitBackend::parse(backend)?;
        }
        if let Some(ref quota) = self.rate_limit {
            settings.quota = quota.parse().map_err(|e| invalid("rate_limit", e))?;
        }
        if let Some(ref key) = self.api_key {
            settings.api_key = Some(key.clone()).filter(|k| !k.is_empty());
        }
        if let Some(ref endpoint) = self.upstream_endpoint {
            settings.upstream_endpoint =
                Url::parse(endpoint).map_err(|e| invalid("upstream_endpoint", e))?;
        }
        if let Some(ref host) = self.host {
            settings.host = host.clone();
        }
        if let Some(port) = self.port {
            settings.port = port;
        }
        if let Some(secs) = self.request_timeout {
            settings.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.upstream_timeout {
            settings.upstream_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = self.store_timeout_ms {
            settings.store_timeout = Duration::from_millis(ms);
        }
        if let Some(ref ua) = self.user_agent {
            settings.user_agent = Some(ua.clone());
        }
        Ok(())
    }
}

/// Build settings from a config file and the process environment.
///
/// An explicit `config_path` must load; otherwise prefer discovery is used.
pub async fn load_settings(config_path: Option<&Path>) -> Result<Settings, ConfigError> {
    let config = match config_path {
        Some(path) => Config::load_from_path(path).await?,
        None => Config::load().await,
    };

    if let Some(ref path) = config.source_path {
        tracing::debug!("Loaded config from {}", path.display());
    }

    let mut settings = Settings::default();
    config.apply_to_settings(&mut settings)?;
    settings.apply_env(|key| std::env::var(key).ok())?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.quota, QuotaSpec::per_minute(100));
        assert_eq!(settings.request_timeout, Duration::from_secs(30));
        assert_eq!(settings.upstream_timeout, Duration::from_secs(10));
        assert_eq!(settings.store_timeout, Duration::from_secs(2));
        assert_eq!(settings.upstream_endpoint.as_str(), DEFAULT_UPSTREAM_ENDPOINT);
        assert!(settings.api_key.is_none());
        assert_eq!(settings.bind_addr().unwrap().port(), 8080);
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = Settings::default();
        settings
            .apply_env(env(&[
                ("DATABASE_URL", "sqlite:/tmp/x.db"),
                ("REDIS_ADDR", "cache:6379"),
                ("RATE_LIMIT_SPEC", "10-S"),
                ("API_KEY", "secret"),
                ("RM_API_ENDPOINT", "http://localhost:9000/api/character"),
                ("PORT", "9090"),
                ("REQUEST_TIMEOUT_SECS", "5"),
            ]))
            .unwrap();

        assert_eq!(settings.database_url, "sqlite:/tmp/x.db");
        assert_eq!(
            settings.rate_limit_backend,
            RateLimitBackend::Redis("redis://cache:6379".into())
        );
        assert_eq!(settings.quota, QuotaSpec::new(10, Duration::from_secs(1)));
        assert_eq!(settings.api_key.as_deref(), Some("secret"));
        assert_eq!(settings.upstream_endpoint.port(), Some(9000));
        assert_eq!(settings.port, 9090);
        assert_eq!(settings.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_rate_limit_backend_beats_redis_addr() {
        let mut settings = Settings::default();
        settings
            .apply_env(env(&[
                ("RATE_LIMIT_BACKEND", "memory"),
                ("REDIS_ADDR", "cache:6379"),
            ]))
            .unwrap();
        assert_eq!(settings.rate_limit_backend, RateLimitBackend::Memory);
    }

    #[test]
    fn test_empty_env_values_ignored() {
        let mut settings = Settings::default();
        settings
            .apply_env(env(&[("API_KEY", ""), ("PORT", "  ")]))
            .unwrap();
        assert!(settings.api_key.is_none());
        assert_eq!(settings.port, DEFAULT_PORT);
    }

    #[test]
    fn test_invalid_env_values() {
        let mut settings = Settings::default();
        assert!(settings.apply_env(env(&[("PORT", "eighty")])).is_err());
        assert!(settings
            .apply_env(env(&[("RATE_LIMIT_SPEC", "lots")]))
            .is_err());
        assert!(settings
            .apply_env(env(&[("RATE_LIMIT_BACKEND", "memcached")]))
            .is_err());
    }

    #[test]
    fn test_parse_backend() {
        assert_eq!(
            RateLimitBackend::parse("Memory").unwrap(),
            RateLimitBackend::Memory
        );
        assert_eq!(
            RateLimitBackend::parse("sqlite").unwrap(),
            RateLimitBackend::Database
        );
        assert_eq!(
            RateLimitBackend::parse("redis://localhost:6379/0").unwrap(),
            RateLimitBackend::Redis("redis://localhost:6379/0".into())
        );
    }

    #[tokio::test]
    async fn test_load_toml_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("charsync.toml");
        std::fs::write(
            &path,
            r#"
            database_url = "sqlite:data.db"
            rate_limit = "5-M"
            rate_limit_backend = "memory"
            port = 3000
            store_timeout_ms = 250
            "#,
        )
        .unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        assert_eq!(config.source_path.as_deref(), Some(path.as_path()));

        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings).unwrap();
        assert_eq!(settings.database_url, "sqlite:data.db");
        assert_eq!(settings.quota, QuotaSpec::per_minute(5));
        assert_eq!(settings.rate_limit_backend, RateLimitBackend::Memory);
        assert_eq!(settings.port, 3000);
        assert_eq!(settings.store_timeout, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_load_json_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("charsync.json");
        std::fs::write(&path, r#"{"api_key": "k1", "request_timeout": 12}"#).unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings).unwrap();
        assert_eq!(settings.api_key.as_deref(), Some("k1"));
        assert_eq!(settings.request_timeout, Duration::from_secs(12));
    }

    #[tokio::test]
    async fn test_bad_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("charsync.toml");
        std::fs::write(&path, "port = \"not a number\"").unwrap();
        assert!(matches!(
            Config::load_from_path(&path).await,
            Err(ConfigError::Parse { .. })
        ));

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            Config::load_from_path(&missing).await,
            Err(ConfigError::Read { .. })
        ));
    }

    #[tokio::test]
    async fn test_load_settings_from_explicit_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("charsync.toml");
        std::fs::write(&path, "store_timeout_ms = 125\nupstream_timeout = 9\n").unwrap();

        let settings = load_settings(Some(&path)).await.unwrap();
        assert_eq!(settings.store_timeout, Duration::from_millis(125));
        assert_eq!(settings.upstream_timeout, Duration::from_secs(9));

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            load_settings(Some(&missing)).await,
            Err(ConfigError::Read { .. })
        ));
    }
}
