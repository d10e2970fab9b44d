use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{Error as JsonError, Value};

#[derive(Debug)]
pub enum ChatApiError {
    InvalidBaseUrl(String),
    InvalidHeader(String),
    Network(reqwest::Error),
    /// 401/403 on a user-scoped endpoint. Credentials were cleared.
    Unauthorized {
        status: StatusCode,
    },
    /// 401/403 on an `/admin` endpoint. Advisory only, credentials are kept.
    AdminDenied {
        status: StatusCode,
    },
    Status(StatusCode, String),
    StreamFailed {
        message: String,
    },
    Protocol(String),
    Serde(JsonError),
    IdleTimeout(Duration),
    Cancelled,
}

/// Coarse failure classes used by callers to pick a recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Auth,
    Protocol,
    Server,
    UserCancelled,
}

impl ChatApiError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) | Self::IdleTimeout(_) => ErrorKind::Network,
            Self::Unauthorized { .. } | Self::AdminDenied { .. } => ErrorKind::Auth,
            Self::Status(..) | Self::StreamFailed { .. } => ErrorKind::Server,
            Self::InvalidBaseUrl(_) | Self::InvalidHeader(_) | Self::Protocol(_) | Self::Serde(_) => {
                ErrorKind::Protocol
            }
            Self::Cancelled => ErrorKind::UserCancelled,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        self.kind() == ErrorKind::Auth
    }
}

impl fmt::Display for ChatApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBaseUrl(value) => write!(f, "invalid base URL: {value}"),
            Self::InvalidHeader(message) => write!(f, "invalid header: {message}"),
            Self::Network(error) => write!(f, "network error: {error}"),
            Self::Unauthorized { status } => write!(f, "not authorized (HTTP {})", status.as_u16()),
            Self::AdminDenied { status } => {
                write!(f, "admin access denied (HTTP {})", status.as_u16())
            }
            Self::Status(status, message) => write!(f, "HTTP {} {message}", status.as_u16()),
            Self::StreamFailed { message } => write!(f, "stream failed: {message}"),
            Self::Protocol(message) => write!(f, "protocol error: {message}"),
            Self::Serde(error) => write!(f, "serialization error: {error}"),
            Self::IdleTimeout(after) => {
                write!(f, "stream idle for more than {} ms", after.as_millis())
            }
            Self::Cancelled => write!(f, "request was cancelled"),
        }
    }
}

impl std::error::Error for ChatApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Network(error) => Some(error),
            Self::Serde(error) => Some(error),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ChatApiError {
    fn from(error: reqwest::Error) -> Self {
        Self::Network(error)
    }
}

impl From<JsonError> for ChatApiError {
    fn from(error: JsonError) -> Self {
        Self::Serde(error)
    }
}

/// Best human-readable message for a non-2xx response body.
pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    let fallback = || {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    };

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return fallback();
    }

    let Ok(Value::Object(object)) = serde_json::from_str::<Value>(trimmed) else {
        return trimmed.to_string();
    };

    let from_error = match object.get("error") {
        Some(Value::String(message)) => non_empty_string(message),
        Some(Value::Object(details)) => details
            .get("message")
            .and_then(Value::as_str)
            .and_then(non_empty_string),
        _ => None,
    };

    from_error
        .or_else(|| {
            object
                .get("detail")
                .and_then(Value::as_str)
                .and_then(non_empty_string)
        })
        .or_else(|| {
            object
                .get("message")
                .and_then(Value::as_str)
                .and_then(non_empty_string)
        })
        .unwrap_or_else(|| trimmed.to_string())
}

fn non_empty_string(value: &str) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_error_message, ChatApiError, ErrorKind};
    use reqwest::StatusCode;

    #[test]
    fn error_message_prefers_nested_error_message() {
        let body = r#"{"error":{"message":"model overloaded","code":"x"}}"#;
        assert_eq!(
            parse_error_message(StatusCode::SERVICE_UNAVAILABLE, body),
            "model overloaded"
        );
    }

    #[test]
    fn error_message_reads_fastapi_detail() {
        let body = r#"{"detail":"Session not found"}"#;
        assert_eq!(
            parse_error_message(StatusCode::NOT_FOUND, body),
            "Session not found"
        );
    }

    #[test]
    fn error_message_falls_back_to_reason_for_empty_body() {
        assert_eq!(
            parse_error_message(StatusCode::BAD_GATEWAY, "  "),
            "Bad Gateway"
        );
    }

    #[test]
    fn error_message_keeps_plain_text_bodies() {
        assert_eq!(
            parse_error_message(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            "boom"
        );
    }

    #[test]
    fn kinds_follow_failure_taxonomy() {
        assert_eq!(ChatApiError::Cancelled.kind(), ErrorKind::UserCancelled);
        assert_eq!(
            ChatApiError::AdminDenied {
                status: StatusCode::FORBIDDEN
            }
            .kind(),
            ErrorKind::Auth
        );
        assert_eq!(
            ChatApiError::StreamFailed {
                message: "x".to_string()
            }
            .kind(),
            ErrorKind::Server
        );
        assert_eq!(
            ChatApiError::IdleTimeout(std::time::Duration::from_secs(1)).kind(),
            ErrorKind::Network
        );
    }
}
