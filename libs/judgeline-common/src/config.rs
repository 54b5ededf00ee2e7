// Application configuration, read from the environment

use std::time::Duration;
use thiserror::Error;

const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_POLL_TIMEOUT_SECS: u64 = 60;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// How the result poller waits for a batch to finish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// `None` waits until the backend reports completion
    pub max_wait: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_wait: Some(Duration::from_secs(DEFAULT_POLL_TIMEOUT_SECS)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub judge0_url: String,
    pub judge0_auth_token: Option<String>,
    pub redis_url: String,
    pub poll_interval_ms: u64,
    /// 0 disables the polling deadline
    pub poll_timeout_secs: u64,
    pub http_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `from_env` passes the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let judge0_url = lookup("JUDGE0_API_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("JUDGE0_API_URL"))?
            .trim()
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            judge0_url,
            judge0_auth_token: lookup("JUDGE0_AUTH_TOKEN").filter(|v| !v.is_empty()),
            redis_url: lookup("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            poll_interval_ms: parse_nonzero_u64(&lookup, "POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?,
            poll_timeout_secs: parse_u64(&lookup, "POLL_TIMEOUT_SECS", DEFAULT_POLL_TIMEOUT_SECS)?,
            http_timeout_secs: parse_u64(&lookup, "HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?,
        })
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_wait: match self.poll_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn parse_u64<F>(lookup: &F, key: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

/// A zero poll interval would query the backend in a tight loop
fn parse_nonzero_u64<F>(lookup: &F, key: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse_u64(lookup, key, default)? {
        0 => Err(ConfigError::Invalid {
            key,
            value: "0".to_string(),
        }),
        value => Ok(value),
    }
}
