/// HTTP client for the IAM profile API
use crate::{
    error::{ProfileFetchError, SyncError, SyncResult},
    metrics,
    profile::{IamProfile, ProfileSource},
};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How often and how patiently a failed fetch is retried
///
/// Only transient failures (network, timeout, 5xx) are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// One attempt, error surfaced straight to the caller
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::single_attempt()
    }
}

/// Profile client configuration
#[derive(Debug, Clone)]
pub struct ProfileClientConfig {
    /// Base URL, e.g. `https://person.api.example.org/v2`
    pub base_url: String,
    /// Bearer token for the profile API
    pub api_token: Option<String>,
    /// User-Agent header for HTTP requests
    pub user_agent: String,
    /// Per-request timeout
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl ProfileClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_token: None,
            user_agent: format!("iam-sync/{}", env!("CARGO_PKG_VERSION")),
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_iam_config(iam: &crate::config::IamConfig) -> Self {
        Self {
            api_token: iam.profile_api_token.clone(),
            timeout: Duration::from_secs(iam.timeout_secs),
            retry: RetryPolicy {
                max_attempts: iam.max_attempts.max(1),
                backoff: Duration::from_millis(iam.retry_backoff_ms),
            },
            ..Self::new(iam.profile_api_url.clone())
        }
    }
}

/// Fetches group lists from the remote profile endpoint
#[derive(Clone)]
pub struct ProfileClient {
    http_client: reqwest::Client,
    config: ProfileClientConfig,
}

impl ProfileClient {
    /// Create a new profile client
    pub fn new(config: ProfileClientConfig) -> SyncResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .build()
            .map_err(|e| SyncError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            config,
        })
    }

    /// Profile URL for an external identity id. The id is a single path
    /// segment, so separators such as `|` are percent-encoded.
    pub fn profile_url(&self, uid: &str) -> String {
        format!(
            "{}/profile/{}",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(uid)
        )
    }

    async fn fetch_once(&self, uid: &str) -> Result<BTreeSet<String>, ProfileFetchError> {
        let url = self.profile_url(uid);

        let mut request = self.http_client.get(&url);
        if let Some(token) = &self.config.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProfileFetchError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let profile: IamProfile = serde_json::from_slice(&body)
            .map_err(|e| ProfileFetchError::Payload(e.to_string()))?;

        Ok(profile.groups.into_iter().collect())
    }

    fn map_transport_error(&self, e: reqwest::Error) -> ProfileFetchError {
        if e.is_timeout() {
            ProfileFetchError::Timeout(self.config.timeout)
        } else if e.is_decode() {
            ProfileFetchError::Payload(e.to_string())
        } else {
            ProfileFetchError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl ProfileSource for ProfileClient {
    async fn fetch_groups(&self, uid: &str) -> Result<BTreeSet<String>, ProfileFetchError> {
        let max_attempts = self.config.retry.max_attempts.max(1);
        let started = Instant::now();
        let mut attempt = 1;

        let result = loop {
            match self.fetch_once(uid).await {
                Ok(groups) => break Ok(groups),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    warn!(
                        "Profile fetch for {} failed (attempt {}/{}): {}",
                        uid, attempt, max_attempts, e
                    );
                    tokio::time::sleep(self.config.retry.backoff).await;
                    attempt += 1;
                }
                Err(e) => break Err(e),
            }
        };

        metrics::PROFILE_FETCH_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());
        match &result {
            Ok(groups) => {
                metrics::PROFILE_FETCHES_TOTAL.with_label_values(&["ok"]).inc();
                debug!("Fetched {} IAM groups for {}", groups.len(), uid);
            }
            Err(e) => {
                metrics::PROFILE_FETCHES_TOTAL
                    .with_label_values(&[metrics::fetch_error_label(e)])
                    .inc();
            }
        }

        result
    }
}
