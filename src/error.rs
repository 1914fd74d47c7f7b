//! Error types for Borrowdesk server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Stable numeric error codes exposed to API clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Failure = 1,
    NotAuthorized = 2,
    DbFailure = 3,
    NoSuchRequester = 4,
    NoSuchItem = 5,
    NoSuchSchedule = 6,
    ItemNotAvailable = 7,
    Duplicate = 8,
    ProgramMismatch = 9,
    InvalidReturnTime = 10,
    PendingRequestExists = 11,
    NoSuchTransaction = 12,
    BadValue = 18,
    NoSuchData = 20,
}

/// Machine-checkable failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Conflict,
    NotFound,
    Auth,
    Infrastructure,
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Requester not found: {0}")]
    RequesterNotFound(String),

    #[error("Schedule slot {0} not found")]
    ScheduleNotFound(i32),

    #[error("Schedule is for program {slot}, not for {requester}")]
    ProgramMismatch { slot: String, requester: String },

    #[error("Promised return time must be in the future")]
    InvalidReturnTime,

    #[error("Requester {0} already has an open borrow request")]
    DuplicatePendingRequest(String),

    #[error("Transaction {0} not found or already processed")]
    TransactionNotFound(uuid::Uuid),

    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Item {0} is not available")]
    ItemUnavailable(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Category used by callers to decide whether a retry makes sense
    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::InvalidReturnTime
            | AppError::ProgramMismatch { .. }
            | AppError::Validation(_) => ErrorCategory::Validation,
            AppError::DuplicatePendingRequest(_)
            | AppError::ItemUnavailable(_)
            | AppError::Conflict(_) => ErrorCategory::Conflict,
            AppError::RequesterNotFound(_)
            | AppError::ScheduleNotFound(_)
            | AppError::TransactionNotFound(_)
            | AppError::ItemNotFound(_)
            | AppError::NotFound(_) => ErrorCategory::NotFound,
            AppError::Authentication(_) | AppError::Authorization(_) => ErrorCategory::Auth,
            AppError::Database(_) | AppError::Internal(_) => ErrorCategory::Infrastructure,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::RequesterNotFound(_) => ErrorCode::NoSuchRequester,
            AppError::ScheduleNotFound(_) => ErrorCode::NoSuchSchedule,
            AppError::ProgramMismatch { .. } => ErrorCode::ProgramMismatch,
            AppError::InvalidReturnTime => ErrorCode::InvalidReturnTime,
            AppError::DuplicatePendingRequest(_) => ErrorCode::PendingRequestExists,
            AppError::TransactionNotFound(_) => ErrorCode::NoSuchTransaction,
            AppError::ItemNotFound(_) => ErrorCode::NoSuchItem,
            AppError::ItemUnavailable(_) => ErrorCode::ItemNotAvailable,
            AppError::Authentication(_) | AppError::Authorization(_) => ErrorCode::NotAuthorized,
            AppError::NotFound(_) => ErrorCode::NoSuchData,
            AppError::Validation(_) => ErrorCode::BadValue,
            AppError::Conflict(_) => ErrorCode::Duplicate,
            AppError::Database(_) => ErrorCode::DbFailure,
            AppError::Internal(_) => ErrorCode::Failure,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::Authorization(_) => StatusCode::FORBIDDEN,
            _ => match self.category() {
                ErrorCategory::Validation => StatusCode::BAD_REQUEST,
                ErrorCategory::Conflict => StatusCode::CONFLICT,
                ErrorCategory::NotFound => StatusCode::NOT_FOUND,
                ErrorCategory::Auth => StatusCode::FORBIDDEN,
                ErrorCategory::Infrastructure => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

/// Error response body
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub code: u32,
    pub category: ErrorCategory,
    pub error: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                "Database error".to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let code = self.code();
        let body = Json(ErrorResponse {
            code: code as u32,
            category: self.category(),
            error: format!("{:?}", code),
            message,
        });

        (self.status(), body).into_response()
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
