use std::collections::BTreeMap;

use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};

/// Field name -> first validation message reported for that field.
pub type FieldErrors = BTreeMap<String, String>;

pub type ApiResult<T> = Result<T, ApiError>;

/// RepoError
///
/// Failure modes of the data-access layer. Handlers never inspect driver errors
/// directly; they convert a `RepoError` into an `ApiError`.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("record not found")]
    NotFound,

    /// A foreign-key, check or uniqueness constraint rejected the write.
    #[error("constraint violation: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(tiberius::error::Error),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("unexpected column value: {0}")]
    Decode(String),

    #[error("database unavailable")]
    Unavailable,
}

// SQL Server error numbers: 547 = FK/CHECK violation, 2601/2627 = unique index/constraint.
const CONSTRAINT_ERROR_CODES: [u32; 3] = [547, 2601, 2627];

impl From<tiberius::error::Error> for RepoError {
    fn from(err: tiberius::error::Error) -> Self {
        match &err {
            tiberius::error::Error::Server(token) if CONSTRAINT_ERROR_CODES.contains(&token.code()) => {
                RepoError::Conflict(token.message().to_string())
            }
            _ => RepoError::Database(err),
        }
    }
}

/// ApiError
///
/// The HTTP-facing error taxonomy. Every variant renders as
/// `{"error": true, "code": ..., "message": ..., "field_errors"?: {...}}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{message}")]
    Validation {
        message: String,
        field_errors: FieldErrors,
    },

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    InvalidToken(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    UpstreamAuth(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(field_errors: FieldErrors) -> Self {
        ApiError::Validation {
            message: "Request validation failed".to_string(),
            field_errors,
        }
    }

    /// Shorthand for a validation error on exactly one field.
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut field_errors = FieldErrors::new();
        field_errors.insert(field.to_string(), message.into());
        Self::validation(field_errors)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated(_) | ApiError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::UpstreamAuth(_) => StatusCode::BAD_GATEWAY,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for clients.
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Validation { .. } => "VALIDATION_ERROR",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthenticated(_) => "UNAUTHENTICATED",
            ApiError::InvalidToken(_) => "INVALID_TOKEN",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::UpstreamAuth(_) => "UPSTREAM_AUTH_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn to_json(&self) -> Value {
        let mut body = json!({
            "error": true,
            "code": self.error_code(),
            "message": self.to_string(),
        });
        if let ApiError::Validation { field_errors, .. } = self {
            body["field_errors"] = json!(field_errors);
        }
        body
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.to_json())).into_response()
    }
}

impl From<RepoError> for ApiError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound => ApiError::not_found("Resource not found"),
            RepoError::Conflict(detail) => {
                // Constraint names stay in the logs, not in the response.
                tracing::warn!("Write rejected by database constraint: {}", detail);
                ApiError::Conflict(
                    "The request conflicts with existing data or references a missing record"
                        .to_string(),
                )
            }
            RepoError::Unavailable | RepoError::Pool(_) => {
                tracing::error!("Database connection failure: {}", err);
                ApiError::Internal("Database temporarily unavailable".to_string())
            }
            other => {
                tracing::error!("Data access failure: {}", other);
                ApiError::Internal("A database error occurred".to_string())
            }
        }
    }
}

// --- Extractor rejections ---

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(format!("Invalid JSON body: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(format!("Invalid query string: {}", rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(format!("Invalid path parameter: {}", rejection.body_text()))
    }
}
