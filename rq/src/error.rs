//! Error types for scheduling and request execution

use std::time::Duration;

use reqwest::header::HeaderMap;
use thiserror::Error;

/// Remote error codes that mean the shared call budget is exhausted
const TOKEN_LIMIT_EXCEEDED: &str = "API_TOKEN_LIMIT_EXCEEDED";
const KEY_LIMIT_EXCEEDED: &str = "API_KEY_LIMIT_EXCEEDED";

/// Typed classification of a remote API rejection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Per-token budget exhausted
    TokenLimitExceeded,
    /// Per-key budget exhausted
    KeyLimitExceeded,
    /// Any other error code reported by the service
    Other(String),
}

impl ApiErrorKind {
    /// Map the `error` field of a rejection payload
    pub fn from_code(code: &str) -> Self {
        match code {
            TOKEN_LIMIT_EXCEEDED => ApiErrorKind::TokenLimitExceeded,
            KEY_LIMIT_EXCEEDED => ApiErrorKind::KeyLimitExceeded,
            other => ApiErrorKind::Other(other.to_string()),
        }
    }

    pub fn as_code(&self) -> &str {
        match self {
            ApiErrorKind::TokenLimitExceeded => TOKEN_LIMIT_EXCEEDED,
            ApiErrorKind::KeyLimitExceeded => KEY_LIMIT_EXCEEDED,
            ApiErrorKind::Other(code) => code,
        }
    }
}

/// A rejection reported by the remote service
#[derive(Debug, Clone, Error)]
#[error("API error {status} ({}): {message}", .kind.as_code())]
pub struct ApiError {
    pub status: u16,
    pub kind: ApiErrorKind,
    pub message: String,
    /// Headers of the rejecting response, when one was received
    pub headers: Option<HeaderMap>,
}

impl ApiError {
    pub fn new(status: u16, kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
            headers: None,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Check if the service reports the shared budget exhausted
    pub fn is_rate_limit(&self) -> bool {
        matches!(
            self.kind,
            ApiErrorKind::TokenLimitExceeded | ApiErrorKind::KeyLimitExceeded
        )
    }
}

/// Failure of the pluggable request executor
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for ExecuteError {
    fn from(err: reqwest::Error) -> Self {
        ExecuteError::Transport(err.to_string())
    }
}

impl ExecuteError {
    /// Check if this is a remote rate-limit rejection
    pub fn is_rate_limit(&self) -> bool {
        match self {
            ExecuteError::Api(api) => api.is_rate_limit(),
            ExecuteError::Transport(_) => false,
        }
    }

    /// Headers of the failed response, if the failure carried one
    pub fn headers(&self) -> Option<&HeaderMap> {
        match self {
            ExecuteError::Api(api) => api.headers.as_ref(),
            ExecuteError::Transport(_) => None,
        }
    }
}

/// Rate-limit header contract violation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("Rate limit header not found: {0}")]
    Missing(&'static str),

    #[error("Rate limit header {name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Error a scheduled request settles with
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Request timed out in queue after {0:?}")]
    QueueTimeout(Duration),

    #[error(transparent)]
    Headers(#[from] HeaderError),

    #[error(transparent)]
    Api(ApiError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Scheduler dropped before the request settled")]
    Abandoned,
}

impl From<ExecuteError> for ScheduleError {
    fn from(err: ExecuteError) -> Self {
        match err {
            ExecuteError::Api(api) => ScheduleError::Api(api),
            ExecuteError::Transport(message) => ScheduleError::Transport(message),
        }
    }
}

impl ScheduleError {
    /// Check if this is a local admission denial
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ScheduleError::RateLimit)
    }

    pub fn is_queue_timeout(&self) -> bool {
        matches!(self, ScheduleError::QueueTimeout(_))
    }

    pub fn is_headers_missing(&self) -> bool {
        matches!(self, ScheduleError::Headers(HeaderError::Missing(_)))
    }

    /// Check if the caller may sensibly try again later
    pub fn is_retryable(&self) -> bool {
        match self {
            ScheduleError::RateLimit => true,
            ScheduleError::QueueTimeout(_) => true,
            ScheduleError::Transport(_) => true,
            ScheduleError::Api(api) => api.status >= 500,
            ScheduleError::Headers(_) => false,
            ScheduleError::InvalidResponse(_) => false,
            ScheduleError::Abandoned => false,
        }
    }
}
