//! Configuration for servekit
//!
//! Configs are plain structs built once at process start, either from the
//! environment or from a YAML file, and handed to `Server::new` /
//! `Client::new`. Nothing in the library reads the environment on its own.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;
use std::time::Duration;

use crate::client::ClientConfig;
use crate::error::{Error, Result};
use crate::server::ServerConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// REST client settings
    #[serde(default)]
    pub client: ClientConfig,
}

impl Config {
    /// Read both sections from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            server: ServerConfig::from_lookup(&lookup)?,
            client: ClientConfig::from_lookup(&lookup)?,
        })
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load config from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }
}

/// Environment lookup where an empty value counts as unset
pub fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

pub(crate) fn lookup_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> String {
    lookup(key)
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Parse a Go-style duration such as `30s`, `1m30s`, `1.5s` or `250ms`.
///
/// A leading sign is accepted; negative and overflowing values are errors.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let invalid = || Error::Config(format!("invalid duration: {:?}", input));
    let s = input.trim();
    let (negative, s) = match s.strip_prefix('-') {
        Some(unsigned) => (true, unsigned),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };

    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err(invalid());
    }

    let mut total = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if num_len == 0 {
            return Err(invalid());
        }
        let value: f64 = rest[..num_len].parse().map_err(|_| invalid())?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return Err(invalid()),
        };
        rest = &rest[unit_len..];
        total += value * nanos_per_unit;
    }

    let total = total.round();
    if !total.is_finite() || total >= u64::MAX as f64 {
        return Err(Error::Config(format!("duration out of range: {:?}", input)));
    }
    if negative && total > 0.0 {
        return Err(Error::Config(format!("negative duration: {:?}", input)));
    }
    Ok(Duration::from_nanos(total as u64))
}

/// Render a duration the way `parse_duration` reads it back
pub fn format_duration(duration: Duration) -> String {
    let nanos = duration.as_nanos();
    if nanos == 0 {
        "0s".to_string()
    } else if nanos % 1_000_000_000 == 0 {
        format!("{}s", nanos / 1_000_000_000)
    } else if nanos % 1_000_000 == 0 {
        format!("{}ms", nanos / 1_000_000)
    } else if nanos % 1_000 == 0 {
        format!("{}us", nanos / 1_000)
    } else {
        format!("{}ns", nanos)
    }
}

/// serde adapter for durations written as Go-style strings
pub(crate) mod duration_str {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Mode;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("10us").unwrap(), Duration::from_micros(10));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("30").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("5 days").is_err());
        assert!(parse_duration("1x").is_err());
    }

    #[test]
    fn test_parse_duration_sign_and_range() {
        assert_eq!(parse_duration("+5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("-0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("-0s").unwrap(), Duration::ZERO);
        assert!(matches!(parse_duration("-1s"), Err(Error::Config(msg)) if msg.contains("negative")));
        assert!(matches!(
            parse_duration("9999999999999h"),
            Err(Error::Config(msg)) if msg.contains("out of range")
        ));
        assert!(parse_duration("+").is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
        assert_eq!(format_duration(Duration::ZERO), "0s");
    }

    #[test]
    fn test_from_lookup_defaults() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config.server.addr(), "localhost:8080");
        assert_eq!(config.server.mode, Mode::Debug);
        assert_eq!(config.client.base_url, "");
        assert_eq!(config.client.timeout, Duration::from_secs(30));
        assert_eq!(config.client.retry_count, 3);
        assert_eq!(config.client.retry_wait, Duration::from_secs(1));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("SERVER_HOST", "0.0.0.0"),
            ("SERVER_PORT", "9000"),
            ("GIN_MODE", "release"),
            ("CLIENT_BASE_URL", "http://api.local"),
            ("CLIENT_RETRY_COUNT", "5"),
        ]))
        .unwrap();
        assert_eq!(config.server.addr(), "0.0.0.0:9000");
        assert_eq!(config.server.mode, Mode::Release);
        assert_eq!(config.client.base_url, "http://api.local");
        assert_eq!(config.client.retry_count, 5);
    }

    #[test]
    fn test_empty_value_counts_as_unset() {
        let config = Config::from_lookup(lookup_from(&[("SERVER_PORT", "")])).unwrap();
        assert_eq!(config.server.port, "8080");
    }

    #[test]
    fn test_yaml_config() {
        let yaml = r#"
server:
  host: 127.0.0.1
  port: "3000"
  mode: test
client:
  base_url: https://example.com/api
  timeout: 5s
  retry_count: 1
  retry_wait: 100ms
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(config.server.addr(), "127.0.0.1:3000");
        assert_eq!(config.server.mode, Mode::Test);
        assert_eq!(config.client.timeout, Duration::from_secs(5));
        assert_eq!(config.client.retry_wait, Duration::from_millis(100));
        assert_eq!(config.client.retry_count, 1);
        assert_eq!(
            config.client.headers.get("Accept").map(String::as_str),
            Some("application/json")
        );
    }

    #[test]
    fn test_yaml_invalid_duration() {
        let yaml = "client:\n  timeout: forever\n";
        assert!(Config::from_yaml_str(yaml).is_err());
    }
}
