use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Uniform failure value for every gateway call.
///
/// Transport failures and application failures collapse into this one type;
/// callers only use the variant to pick the text shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("no backend base URL configured")]
    BaseUrlMissing,
    #[error("invalid request path")]
    InvalidPath,
    #[error("request failed: {message}")]
    Request { message: String },
    #[error("failed to read response: {message}")]
    Read { message: String },
    #[error("{message}")]
    Http { status: u16, message: String },
    #[error("invalid JSON response: {message}")]
    Decode { message: String },
    #[error("request task failed: {message}")]
    Task { message: String },
}

impl GatewayError {
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Builds the error for a non-2xx response.
///
/// Prefers the `message` (then `error`) string of a JSON body and falls back
/// to `HTTP <status>` when the body carries nothing usable.
pub fn format_http_error(status: StatusCode, body: &[u8]) -> GatewayError {
    let message = extract_error_message(body)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
    GatewayError::Http {
        status: status.as_u16(),
        message,
    }
}

fn extract_error_message(body: &[u8]) -> Option<String> {
    let value = serde_json::from_slice::<Value>(body).ok()?;
    let object = value.as_object()?;
    non_empty_str(object.get("message")).or_else(|| non_empty_str(object.get("error")))
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    let trimmed = value?.as_str()?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
