use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";
pub const ENV_BASE_URL: &str = "AGENT_CHAT_BASE_URL";
pub const ENV_TIMEOUT_MS: &str = "AGENT_CHAT_TIMEOUT_MS";
pub const ENV_MESSAGE_TIMEOUT_MS: &str = "AGENT_CHAT_MESSAGE_TIMEOUT_MS";
pub const ENV_REQUEST_ATTEMPTS: &str = "AGENT_CHAT_REQUEST_ATTEMPTS";

pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MESSAGE_TIMEOUT_MS: u64 = 130_000;
pub const DEFAULT_REQUEST_ATTEMPTS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("base url must use http:// or https:// and include a host")]
    InvalidBaseUrl,
    #[error("invalid AGENT_CHAT_TIMEOUT_MS: {0}")]
    InvalidTimeout(String),
    #[error("invalid AGENT_CHAT_MESSAGE_TIMEOUT_MS: {0}")]
    InvalidMessageTimeout(String),
    #[error("invalid AGENT_CHAT_REQUEST_ATTEMPTS: {0}")]
    InvalidRequestAttempts(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Normalized base URL; empty means "not configured".
    pub base_url: String,
    /// Timeout for the short read endpoints.
    pub timeout_ms: u64,
    /// Timeout for `POST /api/message`, which waits on the model.
    pub message_timeout_ms: u64,
    /// Attempts for idempotent GETs on transport failure.
    pub request_attempts: usize,
}

impl GatewayConfig {
    #[must_use]
    pub fn new(base_url: impl AsRef<str>) -> Self {
        Self {
            base_url: strip_base_url(base_url.as_ref()),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            message_timeout_ms: DEFAULT_MESSAGE_TIMEOUT_MS,
            request_attempts: DEFAULT_REQUEST_ATTEMPTS,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let (base_url, source) = resolve_base_url()?;
        tracing::debug!(%base_url, source, "resolved chat backend base url");

        let mut config = Self::new(base_url);
        if let Some(raw) = env_non_empty(ENV_TIMEOUT_MS) {
            config.timeout_ms = raw
                .parse()
                .map_err(|error: std::num::ParseIntError| {
                    ConfigError::InvalidTimeout(error.to_string())
                })?;
        }
        if let Some(raw) = env_non_empty(ENV_MESSAGE_TIMEOUT_MS) {
            config.message_timeout_ms = raw
                .parse()
                .map_err(|error: std::num::ParseIntError| {
                    ConfigError::InvalidMessageTimeout(error.to_string())
                })?;
        }
        if let Some(raw) = env_non_empty(ENV_REQUEST_ATTEMPTS) {
            config.request_attempts = raw
                .parse()
                .map_err(|error: std::num::ParseIntError| {
                    ConfigError::InvalidRequestAttempts(error.to_string())
                })?;
        }
        Ok(config)
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(250))
    }

    #[must_use]
    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms.max(250))
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

/// Environment override first, then the default local origin.
pub fn resolve_base_url() -> Result<(String, &'static str), ConfigError> {
    if let Some(base_url) = env_non_empty(ENV_BASE_URL) {
        return normalize_base_url(&base_url).map(|normalized| (normalized, ENV_BASE_URL));
    }
    normalize_base_url(DEFAULT_BASE_URL).map(|normalized| (normalized, "default_origin"))
}

/// Validates an absolute http(s) base URL and strips trailing slashes.
pub fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = strip_base_url(raw);
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(ConfigError::InvalidBaseUrl);
    }
    let Some((_, remainder)) = trimmed.split_once("://") else {
        return Err(ConfigError::InvalidBaseUrl);
    };
    if remainder.trim().is_empty() || remainder.starts_with('/') {
        return Err(ConfigError::InvalidBaseUrl);
    }
    Ok(trimmed)
}

/// Assignment-time cleanup: whitespace and trailing slashes go, nothing else
/// is validated.
#[must_use]
pub fn strip_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_trailing_slashes() {
        assert_eq!(
            normalize_base_url(" https://bot.example.com/// "),
            Ok("https://bot.example.com".to_string())
        );
        assert_eq!(
            normalize_base_url("http://127.0.0.1:8080/"),
            Ok("http://127.0.0.1:8080".to_string())
        );
    }

    #[test]
    fn normalize_rejects_relative_or_hostless_urls() {
        assert_eq!(normalize_base_url("/api"), Err(ConfigError::InvalidBaseUrl));
        assert_eq!(normalize_base_url("http://"), Err(ConfigError::InvalidBaseUrl));
        assert_eq!(normalize_base_url("   "), Err(ConfigError::InvalidBaseUrl));
    }

    #[test]
    fn default_config_points_at_local_origin() {
        let config = GatewayConfig::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.request_attempts, DEFAULT_REQUEST_ATTEMPTS);
        assert_eq!(config.timeout(), Duration::from_millis(DEFAULT_TIMEOUT_MS));
    }

    #[test]
    fn config_new_strips_without_validating() {
        assert_eq!(GatewayConfig::new("http://host:1//").base_url, "http://host:1");
        assert_eq!(GatewayConfig::new("  ").base_url, "");
    }
}
