use std::path::PathBuf;
use std::str::FromStr;

use chrono_tz::Tz;

use crate::clock::SalonClock;

/// Server configuration loaded from `SALOND_*` environment variables.
///
/// | Env Var                    | Default    |
/// |----------------------------|------------|
/// | `SALOND_PORT`              | `5433`     |
/// | `SALOND_BIND`              | `0.0.0.0`  |
/// | `SALOND_DATA_DIR`          | `./data`   |
/// | `SALOND_PASSWORD`          | `salond`   |
/// | `SALOND_MAX_CONNECTIONS`   | `256`      |
/// | `SALOND_COMPACT_THRESHOLD` | `1000`     |
/// | `SALOND_TIMEZONE`          | `UTC`      |
/// | `SALOND_METRICS_PORT`      | disabled   |
/// | `SALOND_TLS_CERT` / `_KEY` | disabled   |
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends before the compactor rewrites the log. 0 disables compaction.
    pub compact_threshold: u64,
    pub clock: SalonClock,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
    UnknownTimezone(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "invalid value for {var}: {value:?}"),
            ConfigError::UnknownTimezone(name) => write!(f, "unknown time zone: {name}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Unset and empty variables take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let timezone = get("SALOND_TIMEZONE").unwrap_or_else(|| "UTC".into());
        let tz = Tz::from_str(timezone.trim())
            .map_err(|_| ConfigError::UnknownTimezone(timezone.clone()))?;

        Ok(Self {
            port: parse_var(&get, "SALOND_PORT")?.unwrap_or(5433),
            bind: get("SALOND_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: PathBuf::from(get("SALOND_DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: get("SALOND_PASSWORD").unwrap_or_else(|| "salond".into()),
            max_connections: parse_var(&get, "SALOND_MAX_CONNECTIONS")?.unwrap_or(256),
            compact_threshold: parse_var(&get, "SALOND_COMPACT_THRESHOLD")?.unwrap_or(1000),
            clock: SalonClock::new(tz),
            metrics_port: parse_var(&get, "SALOND_METRICS_PORT")?,
            tls_cert: get("SALOND_TLS_CERT"),
            tls_key: get("SALOND_TLS_KEY"),
        })
    }
}

fn parse_var<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match get(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}
