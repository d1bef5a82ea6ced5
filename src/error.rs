use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Domain errors surfaced over HTTP. Each carries a short message and the
/// offending context, rendered as the JSON envelope
/// `{status, error_message, error_context}`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{message}: {context}")]
    BadRequest { message: String, context: String },
    #[error("{message}: {context}")]
    NotFound { message: String, context: String },
    #[error("{message}: {context}")]
    ServiceUnavailable { message: String, context: String },
}

impl AppError {
    pub fn bad_request(message: impl Into<String>, context: impl Into<String>) -> Self {
        Self::BadRequest { message: message.into(), context: context.into() }
    }

    pub fn not_found(message: impl Into<String>, context: impl Into<String>) -> Self {
        Self::NotFound { message: message.into(), context: context.into() }
    }

    pub fn service_unavailable(message: impl Into<String>, context: impl Into<String>) -> Self {
        Self::ServiceUnavailable { message: message.into(), context: context.into() }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => "Bad Request",
            Self::NotFound { .. } => "Not Found",
            Self::ServiceUnavailable { .. } => "Service Unavailable",
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        Self::service_unavailable("Store unavailable", err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (message, context) = match &self {
            Self::BadRequest { message, context }
            | Self::NotFound { message, context }
            | Self::ServiceUnavailable { message, context } => (message.clone(), context.clone()),
        };
        let body = serde_json::json!({
            "status": self.reason(),
            "error_message": message,
            "error_context": context,
        });
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_error_kinds() {
        assert_eq!(AppError::bad_request("m", "c").status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::not_found("m", "c").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::service_unavailable("m", "c").status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
