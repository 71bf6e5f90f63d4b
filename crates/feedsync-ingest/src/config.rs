//! Ingestion configuration

use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Listing page that publishes the dated archives
pub const DEFAULT_LISTING_URL: &str = "http://feed.omgili.com/5Rh5AMTrc4Pv/mainstream/posts/";

/// Default Redis address for the watermark store and outbound queue
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Key holding the newest fully ingested batch id
pub const DEFAULT_WATERMARK_KEY: &str = "parser:lastParsedTimestamp";

/// List receiving the extracted documents
pub const DEFAULT_QUEUE_NAME: &str = "NEWS_XML";

pub const DEFAULT_ARCHIVE_EXTENSION: &str = "zip";
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// What the orchestrator does when a batch task fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Let every sibling finish, then report all failures
    #[default]
    WaitAll,
    /// Stop at the first failure and abandon in-flight siblings
    FailFast,
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "wait-all" | "wait_all" => Ok(FailurePolicy::WaitAll),
            "fail-fast" | "fail_fast" => Ok(FailurePolicy::FailFast),
            _ => Err(format!("Invalid failure policy: {s} (expected wait-all or fail-fast)")),
        }
    }
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::WaitAll => f.write_str("wait-all"),
            FailurePolicy::FailFast => f.write_str("fail-fast"),
        }
    }
}

/// Settings for one ingestion run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Directory listing that links to `<id>.<ext>` archives
    pub listing_url: String,

    /// Archive suffix without the leading dot
    pub archive_extension: String,

    pub redis_url: String,

    /// Store commands allowed in flight at once
    pub max_connections: usize,

    /// Batch tasks allowed in flight at once
    pub concurrency: usize,

    pub watermark_key: String,
    pub queue_name: String,

    /// Parent directory for the per-run scratch area (system temp dir if unset)
    pub scratch_root: Option<PathBuf>,

    /// HTTP timeout in seconds
    pub timeout_secs: u64,

    pub failure_policy: FailurePolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            listing_url: DEFAULT_LISTING_URL.to_string(),
            archive_extension: DEFAULT_ARCHIVE_EXTENSION.to_string(),
            redis_url: DEFAULT_REDIS_URL.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            concurrency: DEFAULT_MAX_CONNECTIONS,
            watermark_key: DEFAULT_WATERMARK_KEY.to_string(),
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            scratch_root: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            failure_policy: FailurePolicy::WaitAll,
        }
    }
}

impl IngestConfig {
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder::default()
    }

    /// Parsed listing URL
    pub fn listing_url(&self) -> Result<Url> {
        let url = Url::parse(&self.listing_url).map_err(|e| {
            IngestError::config(format!("invalid listing URL '{}': {e}", self.listing_url))
        })?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(IngestError::config(format!(
                "listing URL must be http or https, got '{other}'"
            ))),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// HTTP client shared by discovery and fetching
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout())
            .user_agent(concat!("feedsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IngestError::config(format!("failed to build HTTP client: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        self.listing_url()?;

        if self.archive_extension.is_empty() || self.archive_extension.contains('/') {
            return Err(IngestError::config(format!(
                "archive extension '{}' must be non-empty and contain no '/'",
                self.archive_extension
            )));
        }

        if self.watermark_key.trim().is_empty() {
            return Err(IngestError::config("watermark key cannot be empty"));
        }

        if self.queue_name.trim().is_empty() {
            return Err(IngestError::config("queue name cannot be empty"));
        }

        if self.concurrency == 0 {
            return Err(IngestError::config("concurrency must be greater than 0"));
        }

        if self.max_connections == 0 {
            return Err(IngestError::config("max connections must be greater than 0"));
        }

        if self.timeout_secs == 0 {
            return Err(IngestError::config("timeout must be greater than 0"));
        }

        Ok(())
    }
}

/// Builder for [`IngestConfig`]
#[derive(Debug, Default)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    pub fn listing_url(mut self, url: impl Into<String>) -> Self {
        self.config.listing_url = url.into();
        self
    }

    pub fn archive_extension(mut self, extension: impl Into<String>) -> Self {
        self.config.archive_extension = extension.into();
        self
    }

    pub fn redis_url(mut self, url: impl Into<String>) -> Self {
        self.config.redis_url = url.into();
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    pub fn watermark_key(mut self, key: impl Into<String>) -> Self {
        self.config.watermark_key = key.into();
        self
    }

    pub fn queue_name(mut self, queue: impl Into<String>) -> Self {
        self.config.queue_name = queue.into();
        self
    }

    pub fn scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.scratch_root = Some(root.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout_secs = secs;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    pub fn build(self) -> IngestConfig {
        self.config
    }
}
