/// Error types for forum-service
use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use thiserror::Error;

use crate::domain::attitude::CounterError;

/// PostgreSQL SQLSTATE codes that signal a write race rather than a bug
const UNIQUE_VIOLATION: &str = "23505";
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

#[derive(Error, Debug)]
pub enum ServiceError {
    /// Required input (usually the acting user) is missing or malformed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Acting user may not touch the resource
    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Concurrent write lost a race on the (owner, item) attitude key
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Counter invariant violated: {0}")]
    CounterInvariant(#[from] CounterError),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ServiceError::Conflict(_))
    }

    /// Stable label used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "validation",
            ServiceError::Authorization(_) => "authorization",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::CounterInvariant(_) => "counter_invariant",
            ServiceError::Database(_) => "database",
            ServiceError::Internal(_) => "internal",
        }
    }
}

/// Races on the attitude key or aborted serializable transactions become
/// `Conflict` so the service can retry them; everything else stays a
/// database error.
impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if let Some(code) = db_err.code() {
                match code.as_ref() {
                    UNIQUE_VIOLATION | SERIALIZATION_FAILURE | DEADLOCK_DETECTED => {
                        return ServiceError::Conflict(db_err.message().to_string());
                    }
                    _ => {}
                }
            }
        }
        ServiceError::Database(err)
    }
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::Authorization(_) => StatusCode::FORBIDDEN,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::CounterInvariant(_)
            | ServiceError::Database(_)
            | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        // Database details stay in the logs
        let message = match self {
            ServiceError::Database(_) => "Database error".to_string(),
            other => other.to_string(),
        };

        HttpResponse::build(status).json(serde_json::json!({
            "error": message,
            "kind": self.kind(),
            "status": status.as_u16(),
        }))
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;
