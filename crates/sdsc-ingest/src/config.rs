//! Ingestion configuration
//!
//! Every component receives its slice of [`IngestConfig`] at construction.
//! Values come from environment variables (after `.env` is loaded by the
//! binary) with defaults matching the public sdsc2 API limits.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{IngestError, IngestResult};

/// Largest `numOfRows` the sdsc2 endpoints accept
pub const MAX_PAGE_SIZE: u32 = 1000;

pub const DEFAULT_BASE_URL: &str = "http://apis.data.go.kr/B553077/api/open/sdsc2";

/// Main ingestion configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestConfig {
    pub api: ApiConfig,
    pub collector: CollectorConfig,
    pub retry: RetryConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
}

/// Upstream API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Decoded data.go.kr service key
    #[serde(skip_serializing)]
    pub service_key: Option<String>,
    pub base_url: String,
    pub request_timeout_secs: u64,
}

/// Paging and parallelism
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Records per request
    pub page_size: u32,
    /// Page ceiling per category, guards against cursor bugs
    pub max_pages: u32,
    /// Page fetches allowed in flight at once
    pub max_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per page, first try included
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory receiving CSV and Parquet snapshots
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// How long a connection waits on a locked database before failing
    pub busy_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            service_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            max_pages: 10_000,
            max_concurrency: 4,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data/processed"),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/commercial_district.db".to_string(),
            max_connections: 5,
            busy_timeout_secs: 30,
        }
    }
}

impl IngestConfig {
    /// Load configuration from environment variables
    ///
    /// - `SDSC_API_KEY` (or `API_KEY`), `SDSC_BASE_URL`, `SDSC_REQUEST_TIMEOUT_SECS`
    /// - `SDSC_PAGE_SIZE`, `SDSC_MAX_PAGES`, `SDSC_MAX_CONCURRENCY`
    /// - `SDSC_MAX_ATTEMPTS`, `SDSC_BASE_BACKOFF_MS`, `SDSC_MAX_BACKOFF_MS`
    /// - `SDSC_OUTPUT_DIR`
    /// - `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS`, `DATABASE_BUSY_TIMEOUT_SECS`
    pub fn from_env() -> IngestResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> IngestResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let config = Self {
            api: ApiConfig {
                service_key: var("SDSC_API_KEY").or_else(|| var("API_KEY")),
                base_url: var("SDSC_BASE_URL").unwrap_or(defaults.api.base_url),
                request_timeout_secs: parse_var(
                    &var,
                    "SDSC_REQUEST_TIMEOUT_SECS",
                    defaults.api.request_timeout_secs,
                )?,
            },
            collector: CollectorConfig {
                page_size: parse_var(&var, "SDSC_PAGE_SIZE", defaults.collector.page_size)?,
                max_pages: parse_var(&var, "SDSC_MAX_PAGES", defaults.collector.max_pages)?,
                max_concurrency: parse_var(
                    &var,
                    "SDSC_MAX_CONCURRENCY",
                    defaults.collector.max_concurrency,
                )?,
            },
            retry: RetryConfig {
                max_attempts: parse_var(&var, "SDSC_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
                base_backoff_ms: parse_var(
                    &var,
                    "SDSC_BASE_BACKOFF_MS",
                    defaults.retry.base_backoff_ms,
                )?,
                max_backoff_ms: parse_var(&var, "SDSC_MAX_BACKOFF_MS", defaults.retry.max_backoff_ms)?,
            },
            storage: StorageConfig {
                output_dir: var("SDSC_OUTPUT_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.output_dir),
            },
            database: DatabaseConfig {
                url: var("DATABASE_URL").unwrap_or(defaults.database.url),
                max_connections: parse_var(
                    &var,
                    "DATABASE_MAX_CONNECTIONS",
                    defaults.database.max_connections,
                )?,
                busy_timeout_secs: parse_var(
                    &var,
                    "DATABASE_BUSY_TIMEOUT_SECS",
                    defaults.database.busy_timeout_secs,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> IngestResult<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(IngestError::config("SDSC_BASE_URL must not be empty"));
        }
        if self.api.request_timeout_secs == 0 {
            return Err(IngestError::config("SDSC_REQUEST_TIMEOUT_SECS must be greater than 0"));
        }
        self.collector.validate()?;
        self.retry.validate()?;
        if self.database.max_connections == 0 {
            return Err(IngestError::config("DATABASE_MAX_CONNECTIONS must be greater than 0"));
        }
        Ok(())
    }

    /// The service key, required by anything that talks to the API
    pub fn require_service_key(&self) -> IngestResult<&str> {
        self.api
            .service_key
            .as_deref()
            .ok_or_else(|| IngestError::config("SDSC_API_KEY (or API_KEY) is not set"))
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl CollectorConfig {
    pub fn validate(&self) -> IngestResult<()> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(IngestError::config(format!(
                "SDSC_PAGE_SIZE must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, self.page_size
            )));
        }
        if self.max_pages == 0 {
            return Err(IngestError::config("SDSC_MAX_PAGES must be greater than 0"));
        }
        if self.max_concurrency == 0 {
            return Err(IngestError::config("SDSC_MAX_CONCURRENCY must be greater than 0"));
        }
        Ok(())
    }
}

impl RetryConfig {
    pub fn validate(&self) -> IngestResult<()> {
        if self.max_attempts == 0 {
            return Err(IngestError::config("SDSC_MAX_ATTEMPTS must be greater than 0"));
        }
        if self.base_backoff_ms > self.max_backoff_ms {
            return Err(IngestError::config(format!(
                "SDSC_BASE_BACKOFF_MS ({}) exceeds SDSC_MAX_BACKOFF_MS ({})",
                self.base_backoff_ms, self.max_backoff_ms
            )));
        }
        Ok(())
    }
}

fn parse_var<T, F>(var: &F, name: &str, default: T) -> IngestResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| IngestError::config(format!("{} has invalid value '{}': {}", name, raw, e))),
        None => Ok(default),
    }
}
