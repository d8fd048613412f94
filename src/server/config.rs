//! Server configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::{env_lookup, lookup_or};
use crate::error::{Error, Result};

/// Engine run mode, read from `GIN_MODE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Debug,
    Release,
    Test,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Debug => "debug",
            Mode::Release => "release",
            Mode::Test => "test",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "debug" => Ok(Mode::Debug),
            "release" => Ok(Mode::Release),
            "test" => Ok(Mode::Test),
            other => Err(Error::Config(format!(
                "unknown server mode {:?} (expected debug, release or test)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind (default: localhost)
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind, kept as a string so `host:port` is a plain concatenation
    #[serde(default = "default_port")]
    pub port: String,

    #[serde(default)]
    pub mode: Mode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            mode: Mode::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
            mode: Mode::default(),
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Read `SERVER_HOST`, `SERVER_PORT` and `GIN_MODE`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            host: lookup_or(lookup, "SERVER_HOST", &default_host()),
            port: lookup_or(lookup, "SERVER_PORT", &default_port()),
            mode: lookup_or(lookup, "GIN_MODE", Mode::default().as_str()).parse()?,
        })
    }

    /// Listen address, `host:port`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> String {
    "8080".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_is_host_colon_port() {
        for (host, port) in [("localhost", "8080"), ("0.0.0.0", "0"), ("::1", "443"), ("", "")] {
            let config = ServerConfig::new(host, port);
            assert_eq!(config.addr(), format!("{}:{}", host, port));
        }
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("debug".parse::<Mode>().unwrap(), Mode::Debug);
        assert_eq!("release".parse::<Mode>().unwrap(), Mode::Release);
        assert_eq!("test".parse::<Mode>().unwrap(), Mode::Test);
        assert!("production".parse::<Mode>().is_err());
    }

    #[test]
    fn test_unknown_mode_from_env_is_error() {
        let result = ServerConfig::from_lookup(&|key: &str| {
            (key == "GIN_MODE").then(|| "verbose".to_string())
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
