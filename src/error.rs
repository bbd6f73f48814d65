// src/error.rs
use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

pub type AppResult<T> = Result<T, AppError>;

pub const ALREADY_VOTED: &str = "You have already voted in this poll";

#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed or rule-violating input. Never retried.
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("You do not have permission to perform this action")]
    Forbidden,

    #[error("Authentication credentials were not provided")]
    AuthenticationRequired,

    #[error("No active account found with the given credentials")]
    InvalidCredentials,

    #[error("Token is invalid or expired: {0}")]
    InvalidToken(String),

    #[error("Request was throttled, expected available in {retry_after} seconds")]
    Throttled { retry_after: u64 },

    /// A uniqueness or membership constraint fired inside the store.
    #[error("Conflicting write: {0}")]
    Conflict(String),

    #[error("Storage temporarily unavailable: {0}")]
    Transient(sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Conflict(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::AuthenticationRequired
            | AppError::InvalidCredentials
            | AppError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            AppError::Throttled { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) | AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the caller; storage and internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Conflict(_) => "Request conflicts with existing data".to_string(),
            AppError::Transient(_) => "Service temporarily unavailable, try again".to_string(),
            AppError::Internal(_) | AppError::Config(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Transient(_))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("Record"),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                AppError::Transient(err)
            }
            sqlx::Error::Database(ref db_err) => {
                if db_err.is_unique_violation() || db_err.is_foreign_key_violation() {
                    AppError::Conflict(db_err.message().to_string())
                } else if is_busy_code(db_err.code().as_deref()) {
                    AppError::Transient(err)
                } else {
                    AppError::Internal(err.to_string())
                }
            }
            other => AppError::Internal(other.to_string()),
        }
    }
}

// SQLITE_BUSY, SQLITE_LOCKED and their extended forms.
fn is_busy_code(code: Option<&str>) -> bool {
    matches!(code, Some("5" | "6" | "261" | "262" | "517"))
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::Internal(format!("migration failed: {err}"))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            error!(error = %self, "request failed");
        } else {
            debug!(error = %self, "request rejected");
        }

        let mut response = (status, Json(json!({ "error": self.public_message() }))).into_response();

        if let AppError::Throttled { retry_after } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::validation("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::NotFound("Poll").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::AuthenticationRequired.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::Throttled { retry_after: 3 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::Transient(sqlx::Error::PoolTimedOut).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_conflict_hides_constraint_names() {
        let err = AppError::Conflict("UNIQUE constraint failed: votes.poll_id".into());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.public_message().contains("votes.poll_id"));
    }

    #[test]
    fn test_busy_codes() {
        assert!(is_busy_code(Some("5")));
        assert!(is_busy_code(Some("517")));
        assert!(!is_busy_code(Some("2067")));
        assert!(!is_busy_code(None));
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let err = AppError::Internal("disk exploded at /var/lib".into());
        assert!(!err.public_message().contains("/var/lib"));
    }

    #[test]
    fn test_pool_timeout_is_transient() {
        let err: AppError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_transient());

        let err: AppError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_throttled_sets_retry_after() {
        let response = AppError::Throttled { retry_after: 42 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), "42");
    }
}
