use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::error;

use super::Envelope;

/// Failure of one query-service request, rendered as an error envelope.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing or invalid api key")]
    Unauthorized,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("internal error: {0}")]
    Internal(crate::Error),
}

impl From<crate::Error> for ApiError {
    fn from(err: crate::Error) -> Self {
        match err {
            crate::Error::PollExists(id) => Self::Conflict(format!("poll '{}' already exists", id)),
            other => Self::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Internal(err) => {
                error!("Request failed: {}", err);
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(Envelope::error("internal error")),
                )
                    .into_response();
            }
        };

        (status, Json(Envelope::error(self.to_string()))).into_response()
    }
}
