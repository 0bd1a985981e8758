use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::db::DbError;
use crate::schema::ValidationError;

/// Every failure a handler can produce. The status code and the public
/// message are derived from the variant alone; source details only reach
/// the log.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("authentication required")]
    Unauthenticated,
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("constraint violated: {constraint}")]
    ConstraintViolation { constraint: String },
    #[error("data store unavailable: {0}")]
    DataUnavailable(String),
    #[error("ai provider not configured")]
    ProviderUnavailable,
    #[error("upstream request failed: {0:#}")]
    Upstream(anyhow::Error),
    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl From<DbError> for AppError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::ConstraintViolation { constraint } => AppError::ConstraintViolation { constraint },
            DbError::DataUnavailable(reason) => AppError::DataUnavailable(reason),
            DbError::Query(e) => AppError::Internal(anyhow::Error::new(e).context("database query")),
        }
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ConstraintViolation { .. } => StatusCode::CONFLICT,
            AppError::DataUnavailable(_) | AppError::ProviderUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Unauthenticated => "UNAUTHENTICATED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::ConstraintViolation { .. } => "CONFLICT",
            AppError::DataUnavailable(_) => "DATA_UNAVAILABLE",
            AppError::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            AppError::Upstream(_) => "UPSTREAM_FAILURE",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Client-safe message.
    pub fn message(&self) -> String {
        match self {
            AppError::Validation(_) => "request validation failed".into(),
            AppError::Unauthenticated => "authentication required".into(),
            AppError::Forbidden(reason) => (*reason).into(),
            AppError::NotFound(what) => format!("{what} not found"),
            AppError::ConstraintViolation { constraint } => conflict_message(constraint).into(),
            AppError::DataUnavailable(_) => "data store temporarily unavailable".into(),
            AppError::ProviderUnavailable => "ai provider is not configured".into(),
            AppError::Upstream(_) => "upstream provider request failed".into(),
            AppError::Internal(_) => "internal server error".into(),
        }
    }

    fn log(&self) {
        let code = self.code();
        match self {
            AppError::Internal(e) => error!(code, error = %format!("{e:#}"), "request failed"),
            AppError::Upstream(e) => warn!(code, error = %format!("{e:#}"), "upstream failure"),
            AppError::DataUnavailable(reason) => warn!(code, %reason, "data store unavailable"),
            AppError::ConstraintViolation { constraint } => {
                warn!(code, %constraint, "constraint violation")
            }
            AppError::Validation(v) => debug!(code, fields = %v, "validation failed"),
            other => debug!(code, error = %other, "request rejected"),
        }
    }
}

fn conflict_message(constraint: &str) -> &'static str {
    match constraint {
        "users_email_key" => "email is already registered",
        "todos_user_id_title_key" => "a todo with this title already exists",
        _ => "request conflicts with existing data",
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.log();
        let mut body = json!({
            "error": true,
            "code": self.code(),
            "message": self.message(),
        });
        if let AppError::Validation(v) = &self {
            body["field_errors"] = json!(v.field_errors());
        }
        (self.status_code(), Json(body)).into_response()
    }
}
