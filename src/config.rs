use std::net::SocketAddr;

use url::Url;

// ── Constants ────────────────────────────────────────────────────────────────

const WEBHOOK_URL_VAR: &str = "NUTRITION_WEBHOOK_URL";
const BIND_ADDR_VAR: &str = "BIND_ADDR";
const MAX_BODY_BYTES_VAR: &str = "MAX_BODY_BYTES";

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("NUTRITION_WEBHOOK_URL is not a valid http(s) URL: {0}")]
    InvalidWebhookUrl(String),
    #[error("BIND_ADDR is not a valid socket address: {0}")]
    InvalidBindAddr(String),
    #[error("MAX_BODY_BYTES must be a positive integer: {0}")]
    InvalidBodyLimit(String),
}

// ── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Config {
    /// `None` keeps the service up; analysis requests then fail individually.
    pub webhook_url: Option<String>,
    pub bind_addr: SocketAddr,
    pub max_body_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup, so tests don't have to touch the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let webhook_url = match lookup(WEBHOOK_URL_VAR).map(|v| v.trim().to_string()) {
            Some(raw) if !raw.is_empty() => Some(validate_webhook_url(&raw)?),
            _ => None,
        };

        let bind_addr = lookup(BIND_ADDR_VAR)
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidBindAddr(e.to_string()))?;

        let max_body_bytes = match lookup(MAX_BODY_BYTES_VAR) {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => return Err(ConfigError::InvalidBodyLimit(raw)),
            },
            None => DEFAULT_MAX_BODY_BYTES,
        };

        Ok(Self {
            webhook_url,
            bind_addr,
            max_body_bytes,
        })
    }
}

fn validate_webhook_url(raw: &str) -> Result<String, ConfigError> {
    let parsed = Url::parse(raw).map_err(|e| ConfigError::InvalidWebhookUrl(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(raw.to_string()),
        other => Err(ConfigError::InvalidWebhookUrl(format!(
            "unsupported scheme '{}'",
            other
        ))),
    }
}
