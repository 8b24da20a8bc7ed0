//! Error types for web handlers.
//!
//! [`AppError`] bridges [`SagaError`] and HTTP responses. Every error body
//! has the same shape:
//!
//! ```json
//! { "success": false, "error": "order id is required", "code": "VALIDATION_ERROR" }
//! ```

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use payment_saga_core::SagaError;
use serde::Serialize;
use std::fmt;

/// Application error type for web handlers.
///
/// # Examples
///
/// ```ignore
/// async fn handler(State(state): State<AppState>) -> Result<Json<Data>, AppError> {
///     let outcome = state.refunds.refund(&id).await?;
///     Ok(Json(outcome))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: &'static str,
    /// Internal error (for logging, not exposed to client)
    source: Option<SagaError>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: &'static str) -> Self {
        Self {
            status,
            message,
            code,
            source: None,
        }
    }

    /// Attach the domain error this response was built from.
    #[must_use]
    pub fn with_source(mut self, source: SagaError) -> Self {
        self.source = Some(source);
        self
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message.into(), "BAD_REQUEST")
    }

    /// Create a 401 Unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message.into(), "UNAUTHORIZED")
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message.into(),
            "INTERNAL_SERVER_ERROR",
        )
    }

    /// Map a webhook failure.
    ///
    /// The gateway treats any non-2xx as "redeliver later", so signature and
    /// payload problems are 400 rather than 401.
    #[must_use]
    pub fn from_webhook(err: SagaError) -> Self {
        match err {
            SagaError::Authentication(message) => {
                Self::new(StatusCode::BAD_REQUEST, message, "INVALID_SIGNATURE")
            }
            SagaError::Validation(message) => {
                Self::new(StatusCode::BAD_REQUEST, message, "INVALID_EVENT")
            }
            other => Self::from(other),
        }
    }

    /// HTTP status of this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Error code sent to the client.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<SagaError> for AppError {
    fn from(err: SagaError) -> Self {
        let (status, code) = match &err {
            SagaError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            SagaError::Gateway(_) => (StatusCode::BAD_GATEWAY, "GATEWAY_ERROR"),
            SagaError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            SagaError::InvalidState(_) => (StatusCode::CONFLICT, "INVALID_STATE"),
            SagaError::Authentication(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            SagaError::Irrecoverable(_) => (StatusCode::UNPROCESSABLE_ENTITY, "IRRECOVERABLE"),
            SagaError::DownstreamSync(_) => (StatusCode::BAD_GATEWAY, "DOWNSTREAM_SYNC_ERROR"),
            SagaError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
        };
        let message = if status.is_server_error() && status != StatusCode::BAD_GATEWAY {
            "An internal error occurred".to_string()
        } else {
            err.to_string()
        };
        Self::new(status, message, code).with_source(err)
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    code: &'static str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    error = %source,
                    "Request failed"
                ),
                None => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    "Request failed"
                ),
            }
        }

        let body = ErrorResponse {
            success: false,
            error: self.message,
            code: self.code,
        };

        (self.status, Json(body)).into_response()
    }
}
