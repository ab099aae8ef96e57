//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/swim";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Results website the registry is discovered from.
pub const DEFAULT_SOURCE_BASE_URL: &str = "https://live.musz.hu";

/// Default per-request HTTP timeout in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Default attempts per HTTP request before the error is treated as transient.
pub const DEFAULT_HTTP_MAX_RETRIES: u32 = 3;

/// Default per-operation timeout for archive uploads and lookups, in seconds.
pub const DEFAULT_S3_TIMEOUT_SECS: u64 = 120;

pub const DEFAULT_HTTP_USER_AGENT: &str = "swim-ingest/0.1";

/// Storage mount the fetcher writes to and the importer reads from.
pub const DEFAULT_LENEX_DIR: &str = "lenex_files";

/// Default object key prefix for archived files.
pub const DEFAULT_ARCHIVE_PREFIX: &str = "lenex";

/// Default number of fresh-read retries after a lost compare-and-set.
pub const DEFAULT_STALE_RETRY_LIMIT: u32 = 3;

/// Full configuration for every stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub source: SourceConfig,
    pub storage: StorageConfig,
    pub archive: ArchiveConfig,
    pub stage: StageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Results website and HTTP client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub user_agent: String,
}

/// Local storage mount for fetched files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub lenex_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveBackend {
    S3,
    Local,
}

impl std::str::FromStr for ArchiveBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "s3" => Ok(ArchiveBackend::S3),
            "local" | "dir" => Ok(ArchiveBackend::Local),
            _ => Err(anyhow::anyhow!("Invalid archive backend: {}", s)),
        }
    }
}

/// Off-site copy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    pub backend: ArchiveBackend,
    pub prefix: String,
    /// Target directory for the local backend
    pub dir: Option<PathBuf>,
    pub s3: S3Config,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    #[serde(skip_serializing)]
    pub secret_key: String,
    pub path_style: bool,
    /// Operation timeout covering retries of one S3 call
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub stale_retry_limit: u32,
    /// Maximum entries a single stage run processes; `None` means all
    pub batch_limit: Option<i64>,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend = match std::env::var("ARCHIVE_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => ArchiveBackend::S3,
        };

        let config = Config {
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_or(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                min_connections: env_or(
                    "DATABASE_MIN_CONNECTIONS",
                    DEFAULT_DATABASE_MIN_CONNECTIONS,
                ),
                connect_timeout_secs: env_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
            },
            source: SourceConfig {
                base_url: std::env::var("SOURCE_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_SOURCE_BASE_URL.to_string()),
                timeout_secs: env_or("HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS),
                max_retries: env_or("HTTP_MAX_RETRIES", DEFAULT_HTTP_MAX_RETRIES),
                user_agent: std::env::var("HTTP_USER_AGENT")
                    .unwrap_or_else(|_| DEFAULT_HTTP_USER_AGENT.to_string()),
            },
            storage: StorageConfig {
                lenex_dir: std::env::var("LENEX_DIR")
                    .unwrap_or_else(|_| DEFAULT_LENEX_DIR.to_string())
                    .into(),
            },
            archive: ArchiveConfig {
                backend,
                prefix: std::env::var("ARCHIVE_PREFIX")
                    .unwrap_or_else(|_| DEFAULT_ARCHIVE_PREFIX.to_string()),
                dir: std::env::var("ARCHIVE_DIR").ok().map(PathBuf::from),
                s3: S3Config::from_env(),
            },
            stage: StageConfig {
                stale_retry_limit: env_or("STALE_RETRY_LIMIT", DEFAULT_STALE_RETRY_LIMIT),
                batch_limit: std::env::var("BATCH_LIMIT").ok().and_then(|s| s.parse().ok()),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if url::Url::parse(&self.source.base_url).is_err() {
            anyhow::bail!("SOURCE_BASE_URL is not a valid URL: {}", self.source.base_url);
        }

        if self.source.timeout_secs == 0 {
            anyhow::bail!("HTTP timeout must be greater than 0");
        }

        if self.source.max_retries == 0 {
            anyhow::bail!("HTTP max_retries must be at least 1");
        }

        match self.archive.backend {
            ArchiveBackend::Local if self.archive.dir.is_none() => {
                anyhow::bail!("ARCHIVE_DIR must be set when ARCHIVE_BACKEND=local");
            },
            ArchiveBackend::S3 if self.archive.s3.bucket.is_empty() => {
                anyhow::bail!("S3_BUCKET cannot be empty when ARCHIVE_BACKEND=s3");
            },
            ArchiveBackend::S3 if self.archive.s3.timeout_secs == 0 => {
                anyhow::bail!("S3_TIMEOUT_SECS must be greater than 0");
            },
            _ => {},
        }

        if let Some(limit) = self.stage.batch_limit {
            if limit <= 0 {
                anyhow::bail!("BATCH_LIMIT must be positive, got {}", limit);
            }
        }

        Ok(())
    }
}

impl S3Config {
    pub fn from_env() -> Self {
        Self {
            endpoint: std::env::var("S3_ENDPOINT").ok(),
            region: std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            bucket: std::env::var("S3_BUCKET").unwrap_or_else(|_| "swim-results".to_string()),
            access_key: std::env::var("S3_ACCESS_KEY")
                .or_else(|_| std::env::var("AWS_ACCESS_KEY_ID"))
                .unwrap_or_default(),
            secret_key: std::env::var("S3_SECRET_KEY")
                .or_else(|_| std::env::var("AWS_SECRET_ACCESS_KEY"))
                .unwrap_or_default(),
            path_style: env_or("S3_PATH_STYLE", false),
            timeout_secs: env_or("S3_TIMEOUT_SECS", DEFAULT_S3_TIMEOUT_SECS),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            },
            source: SourceConfig {
                base_url: DEFAULT_SOURCE_BASE_URL.to_string(),
                timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
                max_retries: DEFAULT_HTTP_MAX_RETRIES,
                user_agent: DEFAULT_HTTP_USER_AGENT.to_string(),
            },
            storage: StorageConfig {
                lenex_dir: PathBuf::from(DEFAULT_LENEX_DIR),
            },
            archive: ArchiveConfig {
                backend: ArchiveBackend::S3,
                prefix: DEFAULT_ARCHIVE_PREFIX.to_string(),
                dir: None,
                s3: S3Config {
                    endpoint: None,
                    region: "us-east-1".to_string(),
                    bucket: "swim-results".to_string(),
                    access_key: String::new(),
                    secret_key: String::new(),
                    path_style: false,
                    timeout_secs: DEFAULT_S3_TIMEOUT_SECS,
                },
            },
            stage: StageConfig {
                stale_retry_limit: DEFAULT_STALE_RETRY_LIMIT,
                batch_limit: None,
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.source.base_url, DEFAULT_SOURCE_BASE_URL);
        assert_eq!(config.storage.lenex_dir, PathBuf::from("lenex_files"));
    }

    #[test]
    fn test_pool_bounds() {
        let mut config = Config::default();
        config.database.min_connections = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_s3_timeout_must_be_positive() {
        let mut config = Config::default();
        config.archive.s3.timeout_secs = 0;
        assert!(config.validate().is_err());

        config.archive.backend = ArchiveBackend::Local;
        config.archive.dir = Some(PathBuf::from("/srv/archive"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_local_archive_requires_dir() {
        let mut config = Config::default();
        config.archive.backend = ArchiveBackend::Local;
        assert!(config.validate().is_err());

        config.archive.dir = Some(PathBuf::from("/srv/archive"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_base_url() {
        let mut config = Config::default();
        config.source.base_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_archive_backend_parse() {
        assert_eq!("S3".parse::<ArchiveBackend>().unwrap(), ArchiveBackend::S3);
        assert_eq!("local".parse::<ArchiveBackend>().unwrap(), ArchiveBackend::Local);
        assert!("gdrive".parse::<ArchiveBackend>().is_err());
    }

    #[test]
    #[serial_test::serial]
    fn test_env_or_falls_back_on_garbage() {
        std::env::set_var("SWIM_TEST_NUMBER", "not-a-number");
        assert_eq!(env_or("SWIM_TEST_NUMBER", 7u32), 7);
        std::env::set_var("SWIM_TEST_NUMBER", "12");
        assert_eq!(env_or("SWIM_TEST_NUMBER", 7u32), 12);
        std::env::remove_var("SWIM_TEST_NUMBER");
    }
}
