// Gateway Error Types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// HTTP 429
    #[error("Rate limit exceeded, please wait a moment and try again")]
    RateLimited,

    /// HTTP 403 or an "exhausted" message from the gateway
    #[error("Usage quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("Invalid or expired API key: {0}")]
    AuthFailed(String),

    #[error("AI gateway response timeout")]
    Timeout,

    #[error("Cannot connect to AI gateway: {0}")]
    ConnectionFailed(String),

    /// Error reported by the gateway, either as a non-success status or an
    /// `{ "error": ... }` stream payload
    #[error("AI gateway error: {0}")]
    ApiError(String),

    #[error("Response parse error: {0}")]
    ParseError(String),

    /// The byte stream ended or broke before a terminator was seen
    #[error("Stream interrupted: {0}")]
    StreamAborted(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorCode {
    RateLimited,
    QuotaExhausted,
    AuthFailed,
    Timeout,
    ConnectionFailed,
    ApiError,
    ParseError,
    StreamAborted,
    InvalidConfig,
}

impl GatewayErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayErrorCode::RateLimited => "GATEWAY_RATE_LIMITED",
            GatewayErrorCode::QuotaExhausted => "GATEWAY_QUOTA_EXHAUSTED",
            GatewayErrorCode::AuthFailed => "GATEWAY_AUTH_FAILED",
            GatewayErrorCode::Timeout => "GATEWAY_TIMEOUT",
            GatewayErrorCode::ConnectionFailed => "GATEWAY_CONNECTION_FAILED",
            GatewayErrorCode::ApiError => "GATEWAY_API_ERROR",
            GatewayErrorCode::ParseError => "GATEWAY_PARSE_ERROR",
            GatewayErrorCode::StreamAborted => "STREAM_ABORTED",
            GatewayErrorCode::InvalidConfig => "GATEWAY_INVALID_CONFIG",
        }
    }
}

impl GatewayError {
    pub fn code(&self) -> GatewayErrorCode {
        match self {
            GatewayError::RateLimited => GatewayErrorCode::RateLimited,
            GatewayError::QuotaExhausted(_) => GatewayErrorCode::QuotaExhausted,
            GatewayError::AuthFailed(_) => GatewayErrorCode::AuthFailed,
            GatewayError::Timeout => GatewayErrorCode::Timeout,
            GatewayError::ConnectionFailed(_) => GatewayErrorCode::ConnectionFailed,
            GatewayError::ApiError(_) => GatewayErrorCode::ApiError,
            GatewayError::ParseError(_) => GatewayErrorCode::ParseError,
            GatewayError::StreamAborted(_) => GatewayErrorCode::StreamAborted,
            GatewayError::InvalidConfig(_) => GatewayErrorCode::InvalidConfig,
        }
    }

    /// Whether the user can simply try again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Timeout
                | GatewayError::ConnectionFailed(_)
                | GatewayError::StreamAborted(_)
                | GatewayError::ApiError(_)
        )
    }

    /// Rate-limit and quota errors end the turn and are never auto-repaired
    pub fn is_usage_limit(&self) -> bool {
        matches!(self, GatewayError::RateLimited | GatewayError::QuotaExhausted(_))
    }

    /// Map a non-success HTTP status and its body
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = extract_error_message(body).unwrap_or_else(|| body.trim().to_string());
        let lower = message.to_lowercase();

        match status {
            429 => GatewayError::RateLimited,
            401 => GatewayError::AuthFailed(message),
            403 => GatewayError::QuotaExhausted(message),
            _ if lower.contains("exhausted") => GatewayError::QuotaExhausted(message),
            _ => GatewayError::ApiError(format!("HTTP {}: {}", status, message)),
        }
    }

    /// Map an `{ "error": ... }` payload received mid-stream
    pub fn from_stream_payload(message: String) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("rate limit") {
            GatewayError::RateLimited
        } else if lower.contains("exhausted") || lower.contains("quota") {
            GatewayError::QuotaExhausted(message)
        } else {
            GatewayError::ApiError(message)
        }
    }
}

/// Pull a human-readable message out of a JSON error body
fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = value.get("error").unwrap_or(&value);
    let nested = match error {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(map) => map
            .get("message")
            .and_then(|m| m.as_str())
            .map(|m| m.to_string()),
        _ => None,
    };
    nested.or_else(|| value.get("message").and_then(|m| m.as_str()).map(|m| m.to_string()))
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else if err.is_connect() {
            GatewayError::ConnectionFailed(err.to_string())
        } else if err.is_body() || err.is_decode() {
            GatewayError::StreamAborted(err.to_string())
        } else {
            GatewayError::ApiError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::ParseError(err.to_string())
    }
}

impl From<GatewayError> for String {
    fn from(err: GatewayError) -> Self {
        err.to_string()
    }
}
