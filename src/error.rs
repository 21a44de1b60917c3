//! # Error Handling
//!
//! Workflow operations return [`WorkflowError`], a small taxonomy the calling
//! layer renders directly. [`ApiError`] is the problem+json boundary type with
//! trace ID propagation; every `WorkflowError` converts into it.

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use sea_orm::DbErr;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::telemetry;

/// Result alias used by every engine operation
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Errors raised by the registry, ledger and batch workflows
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{entity} {key} not found")]
    NotFound { entity: &'static str, key: String },

    #[error("{message}")]
    Conflict { message: String, ids: Vec<Uuid> },

    #[error("{message}")]
    InvalidState { message: String, ids: Vec<Uuid> },

    #[error("{message}")]
    Validation { message: String },

    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

/// Coarse classification of a [`WorkflowError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidState,
    ValidationError,
    Internal,
}

impl WorkflowError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            ids: Vec::new(),
        }
    }

    pub fn conflict_with(message: impl Into<String>, ids: Vec<Uuid>) -> Self {
        Self::Conflict {
            message: message.into(),
            ids,
        }
    }

    pub fn invalid_state(message: impl Into<String>, ids: Vec<Uuid>) -> Self {
        Self::InvalidState {
            message: message.into(),
            ids,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::NotFound { .. } => ErrorKind::NotFound,
            WorkflowError::Conflict { .. } => ErrorKind::Conflict,
            WorkflowError::InvalidState { .. } => ErrorKind::InvalidState,
            WorkflowError::Validation { .. } => ErrorKind::ValidationError,
            WorkflowError::Database(_) => ErrorKind::Internal,
        }
    }

    /// Ids attached to a conflict or state violation
    pub fn ids(&self) -> &[Uuid] {
        match self {
            WorkflowError::Conflict { ids, .. } | WorkflowError::InvalidState { ids, .. } => ids,
            _ => &[],
        }
    }
}

/// Unified API error response structure
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Extract the trace ID of the running operation (falls back to a generated correlation ID)
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &Uuid::new_v4().simple().to_string()[..8]).into_boxed_str())
            })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        (self.status, headers, axum::Json(self)).into_response()
    }
}

/// Detects unique-constraint violations across Postgres and SQLite drivers.
pub fn is_unique_violation(error: &DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    db_error
        .code()
        .map(|code| {
            let code = code.as_ref();
            code == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code)
        })
        .unwrap_or(false)
}

impl From<WorkflowError> for ApiError {
    fn from(error: WorkflowError) -> Self {
        let ids = error.ids().to_vec();
        let api_error = match &error {
            WorkflowError::NotFound { entity, key } => ApiError::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                error.to_string(),
            )
            .with_details(json!({ "entity": entity, "key": key })),
            WorkflowError::Conflict { .. } => {
                ApiError::new(StatusCode::CONFLICT, "CONFLICT", error.to_string())
            }
            WorkflowError::InvalidState { .. } => {
                ApiError::new(StatusCode::CONFLICT, "INVALID_STATE", error.to_string())
            }
            WorkflowError::Validation { .. } => {
                ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", error.to_string())
            }
            WorkflowError::Database(DbErr::Conn(connection_err)) => {
                tracing::error!("Database connection error: {:?}", connection_err);
                ApiError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database service unavailable",
                )
            }
            WorkflowError::Database(db_err) => {
                tracing::error!("Database error: {:?}", db_err);
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
        };

        if ids.is_empty() {
            api_error
        } else {
            api_error.with_details(json!({ "ids": ids }))
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}
