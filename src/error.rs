use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::models::request::RequestStatus;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: RequestStatus,
        to: RequestStatus,
    },

    #[error("request is no longer available to this provider")]
    NoLongerAvailable,

    #[error("match window has expired")]
    MatchExpired,

    #[error("invalid otp")]
    InvalidOtp,

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => AppError::StoreUnavailable(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::InvalidOtp => StatusCode::BAD_REQUEST,
            AppError::Conflict(_)
            | AppError::InvalidTransition { .. }
            | AppError::NoLongerAvailable => StatusCode::CONFLICT,
            AppError::MatchExpired => StatusCode::GONE,
            AppError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}
