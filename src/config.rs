use std::net::SocketAddr;
use std::time::Duration;

use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_TIKA_SERVER: &str = "http://localhost:9998";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;
const DEFAULT_MAX_RESOURCE_BYTES: u64 = 50 * 1024 * 1024;

/// Process-wide settings, read once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct Config {
    pub tika_server: Url,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub bind_addr: SocketAddr,
    pub max_upload_bytes: usize,
    /// Archive entries above this size are not inlined.
    pub max_resource_bytes: u64,
    pub strip_boilerplate: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tika_server: Url::parse(DEFAULT_TIKA_SERVER).expect("default backend URL is valid"),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            bind_addr: DEFAULT_BIND_ADDR.parse().expect("default bind address is valid"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_resource_bytes: DEFAULT_MAX_RESOURCE_BYTES,
            strip_boilerplate: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("TIKA_SERVER") {
            config.tika_server = Url::parse(&v).map_err(|e| invalid("TIKA_SERVER", e))?;
            if !matches!(config.tika_server.scheme(), "http" | "https") {
                return Err(invalid("TIKA_SERVER", "only http and https are supported"));
            }
        }
        if let Some(v) = get("TIKA_TIMEOUT_SECS") {
            config.timeout = Duration::from_secs(parse_secs("TIKA_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("TIKA_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout =
                Duration::from_secs(parse_secs("TIKA_CONNECT_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("BIND_ADDR") {
            config.bind_addr = v.parse().map_err(|e| invalid("BIND_ADDR", e))?;
        }
        if let Some(v) = get("MAX_UPLOAD_BYTES") {
            config.max_upload_bytes = v.parse().map_err(|e| invalid("MAX_UPLOAD_BYTES", e))?;
        }
        if let Some(v) = get("MAX_RESOURCE_BYTES") {
            config.max_resource_bytes =
                v.parse().map_err(|e| invalid("MAX_RESOURCE_BYTES", e))?;
        }
        if let Some(v) = get("STRIP_BOILERPLATE") {
            config.strip_boilerplate = parse_bool("STRIP_BOILERPLATE", &v)?;
        }
        Ok(config)
    }
}

fn invalid(var: &'static str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        var,
        reason: reason.to_string(),
    }
}

fn parse_secs(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.parse::<u64>() {
        Ok(0) => Err(invalid(var, "must be greater than zero")),
        Ok(n) => Ok(n),
        Err(e) => Err(invalid(var, e)),
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(invalid(var, format!("expected a boolean, got {:?}", other))),
    }
}
