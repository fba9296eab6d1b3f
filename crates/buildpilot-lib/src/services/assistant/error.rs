// Assistant Service Error Types

use thiserror::Error;

use super::sanitizer::SanitizeError;
use crate::services::gateway::GatewayError;
use crate::services::terminal::TerminalError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssistantError {
    /// The reply stream broke before it finished
    #[error("Response stream aborted: {0}")]
    StreamAborted(String),

    #[error("AI gateway rate limit exceeded, please wait a moment and try again")]
    GatewayRateLimited,

    #[error("AI gateway usage quota exhausted: {0}")]
    GatewayQuotaExhausted(String),

    /// Any other gateway failure
    #[error(transparent)]
    Gateway(GatewayError),

    #[error("Failed to write {filename}: {reason}")]
    MaterializationFailed { filename: String, reason: String },

    #[error(transparent)]
    Terminal(#[from] TerminalError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Another turn is still running
    #[error("The assistant is still working on the previous message")]
    TurnInProgress,

    #[error("There is no failed command to retry")]
    NoRetryAvailable,
}

pub type AssistantResult<T> = Result<T, AssistantError>;

impl From<GatewayError> for AssistantError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::RateLimited => AssistantError::GatewayRateLimited,
            GatewayError::QuotaExhausted(msg) => AssistantError::GatewayQuotaExhausted(msg),
            GatewayError::StreamAborted(msg) => AssistantError::StreamAborted(msg),
            other => AssistantError::Gateway(other),
        }
    }
}

impl From<SanitizeError> for AssistantError {
    fn from(err: SanitizeError) -> Self {
        AssistantError::InvalidInput(err.to_string())
    }
}

/// Error codes for the host UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssistantErrorCode {
    StreamAborted,
    GatewayRateLimited,
    GatewayQuotaExhausted,
    GatewayError,
    MaterializationFailed,
    Terminal,
    Storage,
    InvalidInput,
    TurnInProgress,
    NoRetryAvailable,
}

impl AssistantErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssistantErrorCode::StreamAborted => "STREAM_ABORTED",
            AssistantErrorCode::GatewayRateLimited => "GATEWAY_RATE_LIMITED",
            AssistantErrorCode::GatewayQuotaExhausted => "GATEWAY_QUOTA_EXHAUSTED",
            AssistantErrorCode::GatewayError => "GATEWAY_ERROR",
            AssistantErrorCode::MaterializationFailed => "MATERIALIZATION_FAILED",
            AssistantErrorCode::Terminal => "TERMINAL_ERROR",
            AssistantErrorCode::Storage => "STORAGE_ERROR",
            AssistantErrorCode::InvalidInput => "INVALID_INPUT",
            AssistantErrorCode::TurnInProgress => "TURN_IN_PROGRESS",
            AssistantErrorCode::NoRetryAvailable => "NO_RETRY_AVAILABLE",
        }
    }
}

impl AssistantError {
    pub fn code(&self) -> AssistantErrorCode {
        match self {
            AssistantError::StreamAborted(_) => AssistantErrorCode::StreamAborted,
            AssistantError::GatewayRateLimited => AssistantErrorCode::GatewayRateLimited,
            AssistantError::GatewayQuotaExhausted(_) => AssistantErrorCode::GatewayQuotaExhausted,
            AssistantError::Gateway(_) => AssistantErrorCode::GatewayError,
            AssistantError::MaterializationFailed { .. } => AssistantErrorCode::MaterializationFailed,
            AssistantError::Terminal(_) => AssistantErrorCode::Terminal,
            AssistantError::Storage(_) => AssistantErrorCode::Storage,
            AssistantError::InvalidInput(_) => AssistantErrorCode::InvalidInput,
            AssistantError::TurnInProgress => AssistantErrorCode::TurnInProgress,
            AssistantError::NoRetryAvailable => AssistantErrorCode::NoRetryAvailable,
        }
    }

    /// Whether resending the same message may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            AssistantError::StreamAborted(_) | AssistantError::TurnInProgress => true,
            AssistantError::Gateway(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Rate-limit and quota errors end the turn and are never auto-repaired
    pub fn is_usage_limit(&self) -> bool {
        matches!(
            self,
            AssistantError::GatewayRateLimited | AssistantError::GatewayQuotaExhausted(_)
        )
    }
}

impl From<AssistantError> for String {
    fn from(err: AssistantError) -> Self {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_errors_map_to_orchestrator_codes() {
        assert_eq!(
            AssistantError::from(GatewayError::RateLimited).code().as_str(),
            "GATEWAY_RATE_LIMITED"
        );
        assert_eq!(
            AssistantError::from(GatewayError::QuotaExhausted("daily limit".into())).code(),
            AssistantErrorCode::GatewayQuotaExhausted
        );
        assert_eq!(
            AssistantError::from(GatewayError::StreamAborted("eof".into())).code(),
            AssistantErrorCode::StreamAborted
        );
        assert_eq!(
            AssistantError::from(GatewayError::Timeout),
            AssistantError::Gateway(GatewayError::Timeout)
        );
    }

    #[test]
    fn test_usage_limits_are_not_retryable() {
        let limited = AssistantError::from(GatewayError::RateLimited);
        assert!(limited.is_usage_limit());
        assert!(!limited.is_retryable());

        assert!(AssistantError::from(GatewayError::Timeout).is_retryable());
        assert!(!AssistantError::from(GatewayError::AuthFailed("bad key".into())).is_retryable());
    }

    #[test]
    fn test_gateway_message_is_shown_verbatim() {
        let err = AssistantError::from(GatewayError::QuotaExhausted("Monthly quota exhausted".into()));
        assert!(err.to_string().contains("Monthly quota exhausted"));
    }

    #[test]
    fn test_input_errors() {
        let err: AssistantError = SanitizeError::EmptyInput.into();
        assert_eq!(err.code(), AssistantErrorCode::InvalidInput);
        let err: AssistantError = TerminalError::Busy("t1".into()).into();
        assert_eq!(err.code().as_str(), "TERMINAL_ERROR");
    }
}
