use rants_llm::BackendError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error taxonomy carried through tool results, audit rows, and HTTP
/// responses. Kinds are stable identifiers; messages are free-form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadRequest,
    NotFound,
    RateLimited,
    UpstreamError,
    ToolCompileError,
    SandboxViolation,
    ToolExecError,
    DeadlineExceeded,
    RecursionLimit,
    Cancelled,
    ConcurrentModification,
    EmptyCompilation,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::UpstreamError => "upstream_error",
            Self::ToolCompileError => "tool_compile_error",
            Self::SandboxViolation => "sandbox_violation",
            Self::ToolExecError => "tool_exec_error",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::RecursionLimit => "recursion_limit",
            Self::Cancelled => "cancelled",
            Self::ConcurrentModification => "concurrent_modification",
            Self::EmptyCompilation => "empty_compilation",
            Self::Internal => "internal",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(value.to_string())).ok()
    }

    /// HTTP status used when this kind surfaces as a response. Tool-level
    /// kinds never normally reach a client; they map to 500 as a backstop.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::RateLimited => 429,
            Self::UpstreamError | Self::ToolCompileError => 502,
            Self::DeadlineExceeded => 504,
            Self::Cancelled => 499,
            Self::SandboxViolation
            | Self::ToolExecError
            | Self::RecursionLimit
            | Self::ConcurrentModification
            | Self::EmptyCompilation
            | Self::Internal => 500,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub message: String,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn deadline_exceeded() -> Self {
        Self::new(ErrorKind::DeadlineExceeded, "session wallclock exceeded")
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "client disconnected")
    }
}

impl From<BackendError> for GatewayError {
    fn from(error: BackendError) -> Self {
        let message = match error.upstream_status() {
            Some(status) => format!("upstream error (status {status}): {error}"),
            None => format!("upstream error: {error}"),
        };
        Self::new(ErrorKind::UpstreamError, message)
    }
}

impl From<rusqlite::Error> for GatewayError {
    fn from(error: rusqlite::Error) -> Self {
        Self::internal(format!("store error: {error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_string_form() {
        for kind in [
            ErrorKind::BadRequest,
            ErrorKind::SandboxViolation,
            ErrorKind::RecursionLimit,
            ErrorKind::ConcurrentModification,
        ] {
            assert_eq!(ErrorKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ErrorKind::parse("nonsense"), None);
    }

    #[test]
    fn upstream_errors_carry_status_in_message() {
        let error: GatewayError = BackendError::UpstreamStatus {
            status: 500,
            body: "boom".to_string(),
        }
        .into();
        assert_eq!(error.kind, ErrorKind::UpstreamError);
        assert!(error.message.contains("status 500"));
    }
}
