//! API Error Handling
//!
//! Maps the shared error taxonomy onto HTTP responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use pipelines_core::{Error, ErrorKind};

/// Error returned by every handler
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::InvalidInput | ErrorKind::UnknownApiVersion => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// gRPC style code name carried in the body
    pub fn code(&self) -> &'static str {
        match self.0.kind() {
            ErrorKind::InvalidInput | ErrorKind::UnknownApiVersion => "INVALID_ARGUMENT",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ErrorKind::Unauthenticated => "UNAUTHENTICATED",
            ErrorKind::FailedPrecondition => "FAILED_PRECONDITION",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Internal error: {:?}", self.0);
        } else {
            tracing::debug!("Request failed ({}): {}", status, self.0);
        }

        (
            status,
            Json(serde_json::json!({ "error": self.0.to_string(), "code": code })),
        )
            .into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_follows_innermost_kind() {
        let err = ApiError(Error::resource_not_found("Run", "r1").wrap("Failed to fetch run r1"));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.code(), "NOT_FOUND");

        let err = ApiError(Error::FailedPrecondition("archived".into()));
        assert_eq!(err.status(), StatusCode::PRECONDITION_FAILED);

        let err = ApiError(Error::unknown_api_version("CreateRun", "v3"));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = ApiError(Error::internal_msg("boom"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
