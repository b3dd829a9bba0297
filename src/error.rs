use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::users::repo::StoreError;

/// Every failure a handler can surface to a client.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Unauthenticated(&'static str),

    #[error("Admin access denied")]
    Forbidden,

    #[error("Email already in use")]
    DuplicateEmail,

    #[error("{0}")]
    NotFound(String),

    /// Login with an email nobody owns. Kept apart from `NotFound` because
    /// login reports it as a bad request, not a missing resource.
    #[error("User not found")]
    AccountNotFound,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("{0}")]
    InvalidUpload(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// JSON body of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::DuplicateEmail
            | AppError::AccountNotFound
            | AppError::InvalidCredentials
            | AppError::InvalidUpload(_)
            | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn user_not_found() -> Self {
        AppError::NotFound("User not found".into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn invalid_upload(msg: impl Into<String>) -> Self {
        AppError::InvalidUpload(msg.into())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateEmail => AppError::DuplicateEmail,
            StoreError::Other(e) => AppError::Internal(e),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        debug!(status = %rejection.status(), "rejected json body");
        AppError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        debug!(status = %rejection.status(), "rejected query string");
        AppError::Validation(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Internal(e) => {
                error!(error = ?e, "internal error");
                "Server Error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ErrorBody { message })).into_response()
    }
}
