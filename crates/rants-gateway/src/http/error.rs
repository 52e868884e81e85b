//! Maps the error taxonomy onto HTTP responses. Compiler and internal
//! failures are deliberately opaque to clients; detail stays in the logs
//! and the audit trail.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::errors::{ErrorKind, GatewayError};

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.kind.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if self.kind == ErrorKind::Cancelled {
            // Nobody is listening; close without a body.
            return status.into_response();
        }

        let message = match self.kind {
            ErrorKind::ToolCompileError => "tool compilation failed".to_string(),
            ErrorKind::Internal => "internal error".to_string(),
            _ => self.message,
        };
        let body = json!({
            "error": {
                "message": message,
                "type": self.kind.as_str(),
                "code": self.kind.as_str(),
            }
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_taxonomy_table() {
        assert_eq!(ErrorKind::BadRequest.http_status(), 400);
        assert_eq!(ErrorKind::NotFound.http_status(), 404);
        assert_eq!(ErrorKind::RateLimited.http_status(), 429);
        assert_eq!(ErrorKind::UpstreamError.http_status(), 502);
        assert_eq!(ErrorKind::ToolCompileError.http_status(), 502);
        assert_eq!(ErrorKind::DeadlineExceeded.http_status(), 504);
    }
}
