use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use compass_common::Error;
use serde_json::json;
use tracing::{error, warn};

/// Error returned by every handler.
#[derive(Debug)]
pub enum ApiError {
    /// Missing, malformed or unknown `x-user-id`.
    Unauthenticated,
    App(Error),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError::App(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::App(Error::Validation(_)) => StatusCode::BAD_REQUEST,
            ApiError::App(Error::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::App(Error::Agent(_)) => StatusCode::BAD_GATEWAY,
            ApiError::App(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (message, category) = match &self {
            ApiError::Unauthenticated => {
                warn!("rejected request without a valid x-user-id");
                (
                    "Sign in to continue.".to_string(),
                    "Authentication Error",
                )
            }
            ApiError::App(err) => {
                match err {
                    Error::Validation(_) | Error::NotFound(_) => warn!("{err}"),
                    _ => error!("{err}"),
                }
                (err.user_message(), err.category())
            }
        };
        (status, Json(json!({"error": message, "category": category}))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
