/// Configuration management for iam-sync
use crate::error::{SyncError, SyncResult};
use crate::freshness::FreshnessPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub iam: IamConfig,
    pub admin: AdminConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
}

/// Where membership cache entries live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Persisted next to the mapping tables
    Sqlite,
    /// Process-local, lost on restart
    Memory,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database: PathBuf,
    pub cache_backend: CacheBackend,
}

/// Remote IAM profile API and freshness settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IamConfig {
    /// Base URL; profiles are fetched from `{profile_api_url}/profile/{uid}`
    pub profile_api_url: String,
    /// Bearer token attached to profile requests
    pub profile_api_token: Option<String>,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    /// Maximum age of a cached membership entry, in seconds
    pub freshness_window_secs: u64,
}

impl Default for IamConfig {
    fn default() -> Self {
        Self {
            profile_api_url: String::new(),
            profile_api_token: None,
            timeout_secs: 10,
            max_attempts: 1,
            retry_backoff_ms: 250,
            freshness_window_secs: crate::freshness::DEFAULT_WINDOW_SECS,
        }
    }
}

/// Admin API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Admin routes reject every request when unset
    pub token: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> SyncResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("IAM_SYNC_HOSTNAME").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env_number("IAM_SYNC_PORT", 3080u16)?;

        let database: PathBuf = env::var("IAM_SYNC_DATABASE")
            .unwrap_or_else(|_| "./data/iam_sync.sqlite".to_string())
            .into();
        let cache_backend = match env::var("IAM_SYNC_CACHE_BACKEND")
            .unwrap_or_else(|_| "sqlite".to_string())
            .to_lowercase()
            .as_str()
        {
            "sqlite" => CacheBackend::Sqlite,
            "memory" => CacheBackend::Memory,
            other => {
                return Err(SyncError::Validation(format!(
                    "Unknown cache backend: {}",
                    other
                )))
            }
        };

        let profile_api_url = env::var("IAM_PROFILE_API_URL")
            .map_err(|_| SyncError::Validation("IAM_PROFILE_API_URL required".to_string()))?;
        let profile_api_token = env::var("IAM_PROFILE_API_TOKEN")
            .ok()
            .filter(|s| !s.is_empty());

        let defaults = IamConfig::default();
        let timeout_secs = env_number("IAM_PROFILE_TIMEOUT_SECS", defaults.timeout_secs)?;
        let max_attempts = env_number("IAM_PROFILE_MAX_ATTEMPTS", defaults.max_attempts)?;
        let retry_backoff_ms = env_number("IAM_PROFILE_RETRY_BACKOFF_MS", defaults.retry_backoff_ms)?;
        let freshness_window_secs =
            env_number("IAM_FRESHNESS_WINDOW_SECS", defaults.freshness_window_secs)?;

        let admin_token = env::var("IAM_SYNC_ADMIN_TOKEN")
            .ok()
            .filter(|s| !s.is_empty());

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let log_json = env::var("IAM_SYNC_LOG_FORMAT")
            .map(|f| f.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Ok(ServerConfig {
            service: ServiceConfig { hostname, port },
            storage: StorageConfig {
                database,
                cache_backend,
            },
            iam: IamConfig {
                profile_api_url,
                profile_api_token,
                timeout_secs,
                max_attempts,
                retry_backoff_ms,
                freshness_window_secs,
            },
            admin: AdminConfig { token: admin_token },
            logging: LoggingConfig {
                level: log_level,
                json: log_json,
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> SyncResult<()> {
        if self.service.hostname.is_empty() {
            return Err(SyncError::Validation("Hostname cannot be empty".to_string()));
        }

        let url = &self.iam.profile_api_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(SyncError::Validation(format!(
                "Profile API URL must be http(s): {:?}",
                url
            )));
        }

        if self.iam.freshness_window_secs == 0 {
            return Err(SyncError::Validation(
                "Freshness window must be greater than zero".to_string(),
            ));
        }
        FreshnessPolicy::from_secs(self.iam.freshness_window_secs)?;

        if self.iam.max_attempts == 0 {
            return Err(SyncError::Validation(
                "Profile fetch needs at least one attempt".to_string(),
            ));
        }

        if self.iam.timeout_secs == 0 {
            return Err(SyncError::Validation(
                "Profile API timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Read a numeric variable, falling back to `default` only when it is unset
fn env_number<T: FromStr>(key: &str, default: T) -> SyncResult<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| SyncError::Validation(format!("Invalid {}: {:?}", key, raw))),
        Err(_) => Ok(default),
    }
}
