//! Client configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::{duration_str, env_lookup, lookup_or, parse_duration};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Prefix for every relative request path
    #[serde(default)]
    pub base_url: String,

    /// Whole-request timeout, body included
    #[serde(default = "default_timeout", with = "duration_str")]
    pub timeout: Duration,

    /// Extra attempts after the first one fails
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Wait before the first retry; doubles on each further retry
    #[serde(default = "default_retry_wait", with = "duration_str")]
    pub retry_wait: Duration,

    /// Upper bound on the wait between retries
    #[serde(default = "default_retry_max_wait", with = "duration_str")]
    pub retry_max_wait: Duration,

    /// Headers sent with every request
    #[serde(default = "default_headers")]
    pub headers: BTreeMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout: default_timeout(),
            retry_count: default_retry_count(),
            retry_wait: default_retry_wait(),
            retry_max_wait: default_retry_max_wait(),
            headers: default_headers(),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Read `CLIENT_BASE_URL`, `CLIENT_TIMEOUT`, `CLIENT_RETRY_COUNT` and `CLIENT_RETRY_WAIT`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let retry_count = lookup_or(lookup, "CLIENT_RETRY_COUNT", "3");
        let retry_count = retry_count.trim().parse::<u32>().map_err(|_| {
            Error::Config(format!("invalid CLIENT_RETRY_COUNT: {:?}", retry_count))
        })?;

        Ok(Self {
            base_url: lookup_or(lookup, "CLIENT_BASE_URL", ""),
            timeout: parse_duration(&lookup_or(lookup, "CLIENT_TIMEOUT", "30s"))?,
            retry_count,
            retry_wait: parse_duration(&lookup_or(lookup, "CLIENT_RETRY_WAIT", "1s"))?,
            ..Default::default()
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, count: u32, wait: Duration) -> Self {
        self.retry_count = count;
        self.retry_wait = wait;
        self
    }

    pub fn with_retry_max_wait(mut self, max_wait: Duration) -> Self {
        self.retry_max_wait = max_wait;
        self
    }

    /// Add or replace a default header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_wait() -> Duration {
    Duration::from_secs(1)
}

fn default_retry_max_wait() -> Duration {
    Duration::from_secs(2)
}

fn default_headers() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("Content-Type".to_string(), "application/json".to_string()),
        ("Accept".to_string(), "application/json".to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_headers() {
        let config = ClientConfig::default();
        assert_eq!(config.headers.len(), 2);
        assert_eq!(config.headers["Content-Type"], "application/json");
        assert_eq!(config.headers["Accept"], "application/json");
    }

    #[test]
    fn test_builder() {
        let config = ClientConfig::new("http://localhost:8080")
            .with_timeout(Duration::from_secs(5))
            .with_retry(2, Duration::from_millis(10))
            .with_header("Authorization", "Bearer abc");

        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.retry_count, 2);
        assert_eq!(config.retry_wait, Duration::from_millis(10));
        assert_eq!(config.headers["Authorization"], "Bearer abc");
    }

    #[test]
    fn test_from_lookup_parses_durations() {
        let config = ClientConfig::from_lookup(&|key: &str| match key {
            "CLIENT_TIMEOUT" => Some("1m".to_string()),
            "CLIENT_RETRY_WAIT" => Some("500ms".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.retry_wait, Duration::from_millis(500));
        assert_eq!(config.retry_count, 3);
    }

    #[test]
    fn test_from_lookup_bad_retry_count() {
        let result = ClientConfig::from_lookup(&|key: &str| {
            (key == "CLIENT_RETRY_COUNT").then(|| "lots".to_string())
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
