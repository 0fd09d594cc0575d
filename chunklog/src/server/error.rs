//! Mapping of store errors onto HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::Error;

/// Error returned by the API handlers.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: &'static str,
    error: String,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            Error::NotExist(_) => StatusCode::NOT_FOUND,
            Error::Invalid(_) => StatusCode::BAD_REQUEST,
            Error::Exhausted(_) => StatusCode::TOO_MANY_REQUESTS,
            Error::Closed => StatusCode::SERVICE_UNAVAILABLE,
            // nginx's "client closed request"
            Error::Canceled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
            Error::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            Error::Corruption(_) | Error::Io(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = ErrorBody {
            status: "error",
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
