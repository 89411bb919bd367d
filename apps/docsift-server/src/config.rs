//! Configuration management for docsift
//!
//! Everything the pipeline needs is collected into one [`Config`] that is
//! handed to constructors. Nothing below the binary reads the environment.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted request body in bytes
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Sqlite,
    Memory,
}

impl CacheBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    /// Entry lifetime in seconds (0 = no expiry)
    pub ttl_secs: u64,
    /// Maximum entries for the memory backend
    pub memory_capacity: usize,
    /// How often expired entries are purged
    pub sweep_interval_secs: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_secs > 0).then(|| Duration::from_secs(self.ttl_secs))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total provider attempts for retriable failures (minimum 1)
    pub attempts: u32,
    /// First backoff delay; doubled on each further attempt
    pub backoff_base_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    /// Upper bound on a single provider call
    pub timeout_secs: u64,
    pub toc: TocProviderConfig,
    pub chart: ChartProviderConfig,
    pub layout: LayoutProviderConfig,
}

impl ProvidersConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TocProviderConfig {
    pub max_scan_pages: usize,
    pub min_toc_pages: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChartProviderConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub deployment: Option<String>,
    pub api_version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LayoutProviderConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub api_version: String,
    pub poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 5001,
                max_upload_bytes: 50 * 1024 * 1024,
            },
            database: DatabaseConfig {
                url: "sqlite:./docsift.db".to_string(),
                max_connections: 5,
            },
            cache: CacheConfig {
                backend: CacheBackend::Sqlite,
                ttl_secs: 7 * 24 * 3600,
                memory_capacity: 1000,
                sweep_interval_secs: 300,
            },
            retry: RetryConfig {
                attempts: 3,
                backoff_base_ms: 250,
            },
            providers: ProvidersConfig {
                timeout_secs: 60,
                toc: TocProviderConfig {
                    max_scan_pages: 50,
                    min_toc_pages: 1,
                },
                chart: ChartProviderConfig {
                    endpoint: None,
                    api_key: None,
                    deployment: None,
                    api_version: "2023-12-01-preview".to_string(),
                },
                layout: LayoutProviderConfig {
                    endpoint: None,
                    api_key: None,
                    api_version: "2023-07-31".to_string(),
                    poll_interval_ms: 1000,
                },
            },
        }
    }
}

/// Errors while reading configuration from the environment
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let backend = match env::var("CACHE_BACKEND") {
            Ok(value) => match value.to_lowercase().as_str() {
                "sqlite" => CacheBackend::Sqlite,
                "memory" => CacheBackend::Memory,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: "CACHE_BACKEND",
                        value,
                    })
                }
            },
            Err(_) => defaults.cache.backend,
        };

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_var("SERVER_PORT", defaults.server.port)?,
                max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", defaults.server.max_upload_bytes)?,
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
                max_connections: parse_var(
                    "DATABASE_MAX_CONNECTIONS",
                    defaults.database.max_connections,
                )?,
            },
            cache: CacheConfig {
                backend,
                ttl_secs: parse_var("CACHE_TTL_SECS", defaults.cache.ttl_secs)?,
                memory_capacity: parse_var("CACHE_MEMORY_CAPACITY", defaults.cache.memory_capacity)?,
                sweep_interval_secs: parse_var(
                    "CACHE_SWEEP_INTERVAL_SECS",
                    defaults.cache.sweep_interval_secs,
                )?,
            },
            retry: RetryConfig {
                attempts: parse_var("RETRY_ATTEMPTS", defaults.retry.attempts)?,
                backoff_base_ms: parse_var("RETRY_BACKOFF_BASE_MS", defaults.retry.backoff_base_ms)?,
            },
            providers: ProvidersConfig {
                timeout_secs: parse_var("PROVIDER_TIMEOUT_SECS", defaults.providers.timeout_secs)?,
                toc: TocProviderConfig {
                    max_scan_pages: parse_var(
                        "TOC_MAX_SCAN_PAGES",
                        defaults.providers.toc.max_scan_pages,
                    )?,
                    min_toc_pages: parse_var(
                        "TOC_MIN_PAGES",
                        defaults.providers.toc.min_toc_pages,
                    )?,
                },
                chart: ChartProviderConfig {
                    endpoint: first_var(&["CHART_PROVIDER_ENDPOINT", "AZURE_ENDPOINT"]),
                    api_key: first_var(&["CHART_PROVIDER_KEY", "AZURE_API_KEY"]),
                    deployment: first_var(&["CHART_PROVIDER_DEPLOYMENT", "AZURE_DEPLOYMENT"]),
                    api_version: env::var("CHART_PROVIDER_API_VERSION")
                        .unwrap_or(defaults.providers.chart.api_version),
                },
                layout: LayoutProviderConfig {
                    endpoint: first_var(&["SHEET_PROVIDER_ENDPOINT", "DOC_INTEL_ENDPOINT"]),
                    api_key: first_var(&["SHEET_PROVIDER_KEY", "DOC_INTEL_KEY"]),
                    api_version: env::var("SHEET_PROVIDER_API_VERSION")
                        .unwrap_or(defaults.providers.layout.api_version),
                    poll_interval_ms: parse_var(
                        "SHEET_PROVIDER_POLL_MS",
                        defaults.providers.layout.poll_interval_ms,
                    )?,
                },
            },
        })
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        Err(_) => Ok(default),
    }
}

/// First non-empty variable among `names`
fn first_var(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| env::var(name).ok())
        .find(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ttl() {
        let config = Config::default();
        assert_eq!(config.cache.ttl(), Some(Duration::from_secs(7 * 24 * 3600)));
    }

    #[test]
    fn test_zero_ttl_means_no_expiry() {
        let mut config = Config::default();
        config.cache.ttl_secs = 0;
        assert_eq!(config.cache.ttl(), None);
    }

    #[test]
    fn test_provider_timeout_floor() {
        let mut config = Config::default();
        config.providers.timeout_secs = 0;
        assert_eq!(config.providers.timeout(), Duration::from_secs(1));
    }
}
