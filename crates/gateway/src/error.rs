//! Error-to-HTTP translation for the API surface.
//!
//! Validation errors are 400, missing aggregates 404, double starts and
//! duplicate waiters 409; storage and invariant failures are 500.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use tether_domain::Error;

pub struct ApiError(pub Error);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::InvalidInput(_) | Error::UnsafePath(_) | Error::Json(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Canceled => StatusCode::CONFLICT,
            Error::Io(_) | Error::Storage(_) | Error::Model(_) | Error::Tool(_)
            | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "error": self.0.to_string() }));
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(error: Error) -> StatusCode {
        ApiError(error).into_response().status()
    }

    #[test]
    fn mapping() {
        assert_eq!(
            status_of(Error::InvalidInput("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(Error::UnsafePath("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(Error::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_of(Error::Conflict("x".into())), StatusCode::CONFLICT);
        assert_eq!(
            status_of(Error::Storage("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
