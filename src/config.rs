//! Configuration for the JWKS cache.

use std::time::Duration;

use serde::Deserialize;

/// Default scheduled refresh interval in seconds (5 minutes).
pub const DEFAULT_REFRESH_INTERVAL_SECONDS: u64 = 300;

/// Default maximum number of fetch attempts per refresh.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay between fetch attempts in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;

/// Default HTTP client timeout in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 5;

/// JWKS cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksConfig {
    /// URL of the JWKS endpoint.
    pub url: String,
    /// Scheduled refresh interval in seconds (default: 300)
    #[serde(default = "default_refresh_interval_seconds")]
    pub refresh_interval_seconds: u64,
    /// Maximum fetch attempts per refresh before giving up (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay between fetch attempts in milliseconds (default: 500)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// HTTP client timeout in seconds (default: 5)
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    /// Whether a cache miss triggers a synchronous refresh (default: true)
    #[serde(default = "default_refresh_on_miss")]
    pub refresh_on_miss: bool,
    /// Whether a failed on-demand refresh is surfaced to the caller instead
    /// of the not-found error (default: false)
    #[serde(default)]
    pub propagate_refresh_errors: bool,
}

fn default_refresh_interval_seconds() -> u64 {
    DEFAULT_REFRESH_INTERVAL_SECONDS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

fn default_http_timeout_seconds() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECONDS
}

fn default_refresh_on_miss() -> bool {
    true
}

impl Default for JwksConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            refresh_interval_seconds: DEFAULT_REFRESH_INTERVAL_SECONDS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            http_timeout_seconds: DEFAULT_HTTP_TIMEOUT_SECONDS,
            refresh_on_miss: true,
            propagate_refresh_errors: false,
        }
    }
}

impl JwksConfig {
    /// Create a config for the given JWKS endpoint with default settings.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }
}
