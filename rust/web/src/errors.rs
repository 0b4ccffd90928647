//! Error bodies shared by the REST, SSE and socket surfaces.
//!
//! Every failure a caller can see is one JSON shape:
//! `{"error": "<code>", "message": "...", "details": {...}?}`. Error types
//! implement [`IntoErrorResponse`] to pick the status and code; the
//! [`ErrorSeverity`] they report decides how loudly the failure is logged.
use serde::{Deserialize, Serialize};
use std::fmt;
use warp::http::StatusCode;
use warp::reply::{self, Response};
use warp::Reply;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Stable snake_case code, e.g. `not_your_turn`.
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Option<serde_json::Value>) -> Self {
        self.details = details;
        self
    }

    pub fn into_response(self, status: StatusCode) -> Response {
        reply::with_status(reply::json(&self), status).into_response()
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// The caller did something the rules or guards reject.
    Client,
    /// A failure on our side that leaves session state intact.
    Server,
    /// Shared state is unusable (poisoned locks).
    Critical,
}

impl ErrorSeverity {
    pub fn for_status(status: StatusCode) -> Self {
        if status.is_server_error() {
            ErrorSeverity::Server
        } else {
            ErrorSeverity::Client
        }
    }

    fn log(self, status: StatusCode, body: &ErrorResponse) {
        match self {
            ErrorSeverity::Client => tracing::info!(
                status = status.as_u16(),
                error = %body.error,
                message = %body.message,
                "request rejected"
            ),
            ErrorSeverity::Server => tracing::error!(
                status = status.as_u16(),
                error = %body.error,
                message = %body.message,
                "request failed"
            ),
            ErrorSeverity::Critical => tracing::error!(
                status = status.as_u16(),
                error = %body.error,
                message = %body.message,
                critical = true,
                "shared state failure"
            ),
        }
    }
}

/// Maps an error onto the shared JSON error body.
pub trait IntoErrorResponse {
    fn status_code(&self) -> StatusCode;

    fn error_code(&self) -> &'static str;

    fn error_message(&self) -> String;

    fn error_details(&self) -> Option<serde_json::Value> {
        None
    }

    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::for_status(self.status_code())
    }

    fn error_body(&self) -> ErrorResponse {
        ErrorResponse::new(self.error_code(), self.error_message()).with_details(self.error_details())
    }

    /// Log at the error's severity and render the response.
    fn into_http_response(self) -> Response
    where
        Self: Sized,
    {
        let status = self.status_code();
        let body = self.error_body();
        self.severity().log(status, &body);
        body.into_response(status)
    }
}

/// A REST call or socket handshake that did not say who the player is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRequired;

impl IntoErrorResponse for IdentityRequired {
    fn status_code(&self) -> StatusCode {
        StatusCode::UNAUTHORIZED
    }

    fn error_code(&self) -> &'static str {
        "identity_required"
    }

    fn error_message(&self) -> String {
        "requests must identify the player with the x-player-id header".to_string()
    }
}
