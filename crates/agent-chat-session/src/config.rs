use std::time::Duration;

use thiserror::Error;

use crate::coalescer::DEFAULT_REFRESH_WINDOW;
use crate::status::DEFAULT_POLL_INTERVAL;

pub const ENV_SESSIONS_REFRESH_WINDOW_MS: &str = "AGENT_CHAT_SESSIONS_REFRESH_WINDOW_MS";
pub const ENV_STATUS_POLL_INTERVAL_MS: &str = "AGENT_CHAT_STATUS_POLL_INTERVAL_MS";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionConfigError {
    #[error("invalid AGENT_CHAT_SESSIONS_REFRESH_WINDOW_MS: {0}")]
    InvalidRefreshWindow(String),
    #[error("invalid AGENT_CHAT_STATUS_POLL_INTERVAL_MS: {0}")]
    InvalidPollInterval(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Throttle window for non-forced session-list refreshes.
    pub refresh_window: Duration,
    pub status_poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_window: DEFAULT_REFRESH_WINDOW,
            status_poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Result<Self, SessionConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, SessionConfigError> {
        let mut config = Self::default();
        if let Some(raw) = non_empty(lookup(ENV_SESSIONS_REFRESH_WINDOW_MS)) {
            config.refresh_window = parse_millis(&raw)
                .map_err(SessionConfigError::InvalidRefreshWindow)?;
        }
        if let Some(raw) = non_empty(lookup(ENV_STATUS_POLL_INTERVAL_MS)) {
            let interval =
                parse_millis(&raw).map_err(SessionConfigError::InvalidPollInterval)?;
            if interval.is_zero() {
                return Err(SessionConfigError::InvalidPollInterval(
                    "interval must be greater than zero".to_string(),
                ));
            }
            config.status_poll_interval = interval;
        }
        Ok(config)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_millis(raw: &str) -> Result<Duration, String> {
    raw.parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|error| error.to_string())
}
