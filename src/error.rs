//! Error taxonomy shared by the store, the controllers and the REST layer.
//!
//! Every failure ends up as an `AppError`; the HTTP layer turns it into a
//! status code plus a `{"message": ...}` body. The underlying detail is
//! attached to the response as an [`ErrorDetail`] extension so that
//! development builds can echo it back (see `rest::expose_error_detail`).

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use sled::transaction::TransactionError;
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Query error: {0}")]
    Query(#[from] datafusion::error::DataFusionError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Invalid JSON: {0}")]
    Json(#[from] JsonRejection),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<TransactionError<AppError>> for AppError {
    fn from(err: TransactionError<AppError>) -> Self {
        match err {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => AppError::Storage(err),
        }
    }
}

impl From<QueryRejection> for AppError {
    fn from(err: QueryRejection) -> Self {
        AppError::BadRequest(err.body_text())
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(err: bcrypt::BcryptError) -> Self {
        AppError::Internal(format!("password hashing failed: {}", err))
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        AppError::Internal(format!("token signing failed: {}", err))
    }
}

// Helper constructors for the common cases
impl AppError {
    pub fn not_found(kind: &str) -> Self {
        AppError::NotFound(format!("{} not found", kind))
    }

    pub fn invalid_id(kind: &str) -> Self {
        AppError::BadRequest(format!("Invalid {} ID", kind.to_lowercase()))
    }

    pub fn already_exists(what: &str) -> Self {
        AppError::Conflict(format!("{} already exists", what))
    }

    pub fn empty_payload() -> Self {
        AppError::BadRequest("Request body contains no fields to update".to_string())
    }

    pub fn invalid_credentials() -> Self {
        AppError::Unauthorized("Invalid email or password".to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::Validation(_) | AppError::Json(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Storage(_)
            | AppError::Serialization(_)
            | AppError::Query(_)
            | AppError::Arrow(_)
            | AppError::Config(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to any client. Server-side failures are reduced
    /// to a generic line; the detail stays in the logs and in [`ErrorDetail`].
    pub fn public_message(&self) -> String {
        match self {
            AppError::Storage(_) => "Database error".to_string(),
            AppError::Serialization(_) => "Stored document could not be read".to_string(),
            AppError::Query(_) | AppError::Arrow(_) => "Aggregation failed".to_string(),
            AppError::Config(_) | AppError::Internal(_) => "Server error".to_string(),
            other => other.to_string(),
        }
    }
}

/// JSON body of every error response.
#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct ErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Attached to error responses; carries the full error text.
#[derive(Debug, Clone)]
pub struct ErrorDetail(pub String);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }

        let body = ErrorBody {
            message: self.public_message(),
            error: None,
        };
        let mut response = (status, Json(body)).into_response();
        response
            .extensions_mut()
            .insert(ErrorDetail(self.to_string()));
        response
    }
}
