use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::models::Role;
use crate::store::StoreError;
use crate::utils::response::error as error_response;
use crate::utils::validation::describe;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Session expired")]
    SessionExpired,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Role {required} required, caller is {current}")]
    RoleRequired { required: Role, current: Role },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Password reset token is invalid or has expired")]
    ResetTokenInvalid,

    #[error("Email is already registered")]
    EmailTaken,

    #[error("Event is full")]
    EventFull,

    #[error("Already registered for this event")]
    AlreadyRegistered,

    #[error("Event is {0} and no longer accepts registrations")]
    EventClosed(String),

    #[error("Registration deadline has passed")]
    RegistrationClosed,

    #[error("Payment window for this order has expired")]
    PaymentExpired,

    #[error("Ticket is {0}")]
    InvalidTicketState(String),

    #[error("Payment signature verification failed")]
    InvalidSignature,

    #[error("Payment gateway error: {0}")]
    PaymentGatewayError(String),

    #[error("Storage error")]
    StorageError(#[from] StoreError),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) | AppError::SessionExpired => StatusCode::UNAUTHORIZED,
            AppError::InvalidSignature => StatusCode::PAYMENT_REQUIRED,
            AppError::Forbidden(_) | AppError::RoleRequired { .. } => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ResetTokenInvalid => StatusCode::GONE,
            AppError::EmailTaken
            | AppError::EventFull
            | AppError::AlreadyRegistered
            | AppError::EventClosed(_)
            | AppError::RegistrationClosed
            | AppError::PaymentExpired
            | AppError::InvalidTicketState(_) => StatusCode::CONFLICT,
            AppError::PaymentGatewayError(_) => StatusCode::BAD_GATEWAY,
            AppError::StorageError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::SessionExpired => "SESSION_EXPIRED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::RoleRequired { .. } => "ROLE_REQUIRED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::ResetTokenInvalid => "RESET_TOKEN_INVALID",
            AppError::EmailTaken => "EMAIL_TAKEN",
            AppError::EventFull => "EVENT_FULL",
            AppError::AlreadyRegistered => "ALREADY_REGISTERED",
            AppError::EventClosed(_) => "EVENT_CLOSED",
            AppError::RegistrationClosed => "REGISTRATION_CLOSED",
            AppError::PaymentExpired => "PAYMENT_EXPIRED",
            AppError::InvalidTicketState(_) => "INVALID_TICKET_STATE",
            AppError::InvalidSignature => "INVALID_SIGNATURE",
            AppError::PaymentGatewayError(_) => "PAYMENT_GATEWAY_ERROR",
            AppError::StorageError(_) => "STORAGE_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    fn log(&self) {
        match self {
            AppError::StorageError(e) => {
                error!(error = ?e, "Storage error");
            }
            AppError::PaymentGatewayError(msg) => {
                error!(message = %msg, "Payment gateway error");
            }
            AppError::InternalServerError(msg) => {
                error!(message = %msg, "Internal server error");
            }
            _ => {
                warn!(code = self.code(), message = %self, "Request rejected");
            }
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::ValidationError(describe(&errors))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        // Log internal details
        self.log();

        // Only expose high-level message to the client
        let public_message = match &self {
            AppError::ValidationError(msg)
            | AppError::Unauthorized(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg) => msg.clone(),
            AppError::StorageError(_) => "A storage error occurred".to_string(),
            AppError::PaymentGatewayError(_) => {
                "The payment provider could not be reached, please retry".to_string()
            }
            AppError::InternalServerError(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        let details = match &self {
            AppError::RoleRequired { required, current } => Some(json!({
                "requiredRole": required,
                "currentRole": current,
            })),
            _ => None,
        };

        error_response(code, public_message, details, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_kinds_have_distinct_codes() {
        let errors = [
            AppError::EmailTaken,
            AppError::EventFull,
            AppError::AlreadyRegistered,
            AppError::RegistrationClosed,
            AppError::PaymentExpired,
        ];
        let mut codes: Vec<_> = errors.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(errors
            .iter()
            .all(|e| e.status_code() == StatusCode::CONFLICT));
    }

    #[test]
    fn test_storage_errors_are_not_client_errors() {
        let err = AppError::from(StoreError::Corrupt("bad role".to_string()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "STORAGE_ERROR");
    }

    #[test]
    fn test_payment_errors_are_distinguishable() {
        assert_eq!(AppError::InvalidSignature.status_code(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(
            AppError::PaymentGatewayError("timeout".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }
}
