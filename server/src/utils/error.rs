use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, warn};

use crate::models::FieldError;
use crate::services::{AllocationError, AvailabilityError};
use crate::store::StoreError;
use crate::utils::response::error as error_response;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid field: {0}")]
    InvalidField(#[from] FieldError),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Duplicate {field}: {message}")]
    Duplicate { field: &'static str, message: String },

    #[error("Invalid reference in {field}: {message}")]
    InvalidReference { field: &'static str, message: String },

    #[error("Reservation rejected: {0}")]
    Allocation(AllocationError),

    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidField(_) => StatusCode::BAD_REQUEST,
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Duplicate { .. } => StatusCode::CONFLICT,
            AppError::InvalidReference { .. } => StatusCode::BAD_REQUEST,
            AppError::Allocation(AllocationError::SeatAlreadyTaken { .. }) => StatusCode::CONFLICT,
            AppError::Allocation(AllocationError::Store(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Allocation(_) => StatusCode::BAD_REQUEST,
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) | AppError::InvalidField(_) => "VALIDATION_ERROR",
            AppError::AuthError(_) => "AUTH_ERROR",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Duplicate { .. } => "DUPLICATE",
            AppError::InvalidReference { .. } => "INVALID_REFERENCE",
            AppError::Allocation(err) => match err {
                AllocationError::EmptyTicketSet => "EMPTY_TICKET_SET",
                AllocationError::PerformanceNotFound { .. } => "PERFORMANCE_NOT_FOUND",
                AllocationError::RowOutOfRange { .. } => "ROW_OUT_OF_RANGE",
                AllocationError::SeatOutOfRange { .. } => "SEAT_OUT_OF_RANGE",
                AllocationError::SeatAlreadyTaken { .. } => "SEAT_ALREADY_TAKEN",
                AllocationError::Store(_) => "DATABASE_ERROR",
            },
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Structured detail naming the offending field, if any.
    fn details(&self) -> Option<Value> {
        match self {
            AppError::InvalidField(err) => Some(field_details(err.field, &err.message)),
            AppError::Duplicate { field, message } | AppError::InvalidReference { field, message } => {
                Some(field_details(field, message))
            }
            AppError::Allocation(AllocationError::Store(_)) => None,
            AppError::Allocation(err) => Some(json!({
                "tickets": {
                    "index": err.ticket_index(),
                    "field": err.field(),
                    "message": err.to_string(),
                }
            })),
            _ => None,
        }
    }

    fn public_message(&self) -> String {
        match self {
            AppError::ValidationError(msg)
            | AppError::AuthError(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg) => msg.clone(),
            AppError::InvalidField(err) => err.message.clone(),
            AppError::Duplicate { message, .. } | AppError::InvalidReference { message, .. } => {
                message.clone()
            }
            AppError::Allocation(AllocationError::Store(_)) | AppError::DatabaseError(_) => {
                "A database error occurred".to_string()
            }
            AppError::Allocation(err) => err.to_string(),
            AppError::InternalServerError(_) => "An internal error occurred".to_string(),
        }
    }

    fn log(&self) {
        match self {
            AppError::DatabaseError(e) => {
                error!(error = ?e, "Database error");
            }
            AppError::Allocation(AllocationError::Store(e)) => {
                error!(error = ?e, "Store error during reservation");
            }
            AppError::InternalServerError(msg) => {
                error!(error = ?self, message = %msg, "Application error");
            }
            _ => {
                warn!(code = self.code(), error = %self, "Request rejected");
            }
        }
    }
}

/// `{"<field>": ["<message>"]}`
fn field_details(field: &str, message: &str) -> Value {
    let mut map = serde_json::Map::new();
    map.insert(field.to_string(), json!([message]));
    Value::Object(map)
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => {
                AppError::NotFound(format!("{entity} with id '{id}' was not found"))
            }
            StoreError::Duplicate {
                entity,
                field,
                value,
            } => AppError::Duplicate {
                field,
                message: format!("{entity} with this {field} ('{value}') already exists."),
            },
            StoreError::InvalidReference { entity, field } => AppError::InvalidReference {
                field,
                message: format!("Invalid pk - {entity} does not exist."),
            },
            StoreError::SeatTaken {
                row,
                seat,
                performance_id,
            } => AppError::Allocation(AllocationError::SeatAlreadyTaken {
                index: 0,
                row,
                seat,
                performance: performance_id,
            }),
            StoreError::SoldSeatsOutside { field, message } => {
                AppError::InvalidField(FieldError::new(field, message))
            }
            StoreError::SeatOutOfBounds { .. } => AppError::ValidationError(err.to_string()),
            StoreError::Database(e) => AppError::DatabaseError(e),
            StoreError::Poisoned => AppError::InternalServerError(err.to_string()),
        }
    }
}

impl From<AllocationError> for AppError {
    fn from(err: AllocationError) -> Self {
        match err {
            AllocationError::Store(inner) => AppError::from(inner),
            other => AppError::Allocation(other),
        }
    }
}

impl From<AvailabilityError> for AppError {
    fn from(err: AvailabilityError) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        // Log internal details
        self.log();

        // Only expose high-level message to the client
        let public_message = self.public_message();
        let details = self.details();

        error_response(code, public_message, details, status)
    }
}
