//! Server error taxonomy.
//!
//! Every fallible operation below the RPC boundary returns `ServerError`;
//! the front-end maps the variant onto an HTTP status and the JSON error
//! envelope `{"error": {"status", "message"}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Malformed request: bad JSON, empty required field, cyclic workflow.
    #[error("{0}")]
    Validation(String),

    /// Signature verification failed or the caller has no identity here.
    #[error("{0}")]
    Unauthorized(String),

    /// The caller is known but not allowed to perform the operation.
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// Illegal state transition, e.g. closing a waiting process.
    #[error("{0}")]
    Conflict(String),

    /// Database or object-storage outage; the client should retry.
    #[error("{0}")]
    Transient(String),

    #[error("{0}")]
    Internal(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Validation(_) => StatusCode::BAD_REQUEST,
            ServerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServerError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Conflict(_) => StatusCode::CONFLICT,
            ServerError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON body in the wire envelope format.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "status": self.status().as_u16(),
                "message": self.to_string(),
            }
        })
    }
}

impl From<sqlx::Error> for ServerError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ServerError::NotFound("record not found".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                ServerError::Transient(format!("database unavailable: {err}"))
            }
            other => ServerError::Internal(format!("database error: {other}")),
        }
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::Validation(format!("invalid JSON: {err}"))
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ServerError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServerError::Unauthorized("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServerError::Conflict("x".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServerError::Transient("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_row_not_found_folds_to_not_found() {
        let err: ServerError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, ServerError::NotFound(_)));
    }

    #[test]
    fn test_error_envelope() {
        let body = ServerError::NotFound("no such colony".into()).to_json();
        assert_eq!(body["error"]["status"], 404);
        assert_eq!(body["error"]["message"], "no such colony");
    }
}
