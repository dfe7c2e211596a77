use axum::{extract::State, response::Response};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::auth::AuthUser;
use crate::handlers::ValidatedJson;
use crate::models::{AccountView, Role};
use crate::state::AppState;
use crate::utils::error::{AppError, AppResult};
use crate::utils::response::{created, empty_success, success};
use crate::utils::validation::not_blank;

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(
        custom(function = "not_blank", message = "Name is required"),
        length(max = 100, message = "Name must be at most 100 characters")
    )]
    pub name: String,

    #[validate(email(message = "A valid email address is required"))]
    pub email: String,

    #[validate(length(min = 6, max = 72, message = "Password must be between 6 and 72 characters"))]
    pub password: String,

    pub role: Option<Role>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Email is required"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ForgotPasswordRequest {
    #[validate(email(message = "A valid email address is required"))]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResetPasswordRequest {
    #[validate(custom(function = "not_blank", message = "Reset token is required"))]
    pub token: String,

    #[validate(length(min = 6, max = 72, message = "Password must be between 6 and 72 characters"))]
    pub password: String,
}

#[derive(Serialize)]
struct SessionPayload {
    user: AccountView,
    token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResetPayload {
    reset_token: String,
}

pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<RegisterRequest>,
) -> AppResult<Response> {
    let role = body.role.unwrap_or(Role::Student);
    if role == Role::Admin {
        return Err(AppError::ValidationError(
            "Admin accounts cannot be self-registered".to_string(),
        ));
    }

    let account = state
        .identity
        .register(&body.name, &body.email, &body.password, role)
        .await?;
    let token = state.identity.issue_session(&account)?;

    Ok(created(
        SessionPayload {
            user: account.view(),
            token,
        },
        "Registration successful",
    ))
}

pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<LoginRequest>,
) -> AppResult<Response> {
    let account = state.identity.authenticate(&body.email, &body.password).await?;
    let token = state.identity.issue_session(&account)?;

    Ok(success(
        SessionPayload {
            user: account.view(),
            token,
        },
        "Login successful",
    ))
}

pub async fn me(AuthUser(account): AuthUser) -> Response {
    success(account.view(), "Current user")
}

pub async fn forgot_password(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<ForgotPasswordRequest>,
) -> AppResult<Response> {
    const MESSAGE: &str = "If that email is registered, a reset link has been sent";

    let issued = state.identity.request_password_reset(&body.email).await?;
    match issued {
        Some(ticket) if state.config.auth.expose_reset_tokens => Ok(success(
            ResetPayload {
                reset_token: ticket.token,
            },
            MESSAGE,
        )),
        _ => Ok(empty_success(MESSAGE)),
    }
}

pub async fn reset_password(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<ResetPasswordRequest>,
) -> AppResult<Response> {
    state
        .identity
        .reset_password(&body.token, &body.password)
        .await?;
    Ok(empty_success("Password has been reset"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register_request(name: &str, email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            name: name.into(),
            email: email.into(),
            password: password.into(),
            role: None,
        }
    }

    #[test]
    fn test_register_request_rules() {
        assert!(register_request("Ada", "a@b.co", "hunter22").validate().is_ok());
        assert!(register_request("   ", "a@b.co", "hunter22").validate().is_err());
        assert!(register_request(&"n".repeat(101), "a@b.co", "hunter22").validate().is_err());
        assert!(register_request("Ada", "ab.co", "hunter22").validate().is_err());
        assert!(register_request("Ada", "@b.co", "hunter22").validate().is_err());
        assert!(register_request("Ada", "a b@c.co", "hunter22").validate().is_err());
        assert!(register_request("Ada", "a@b.co", "12345").validate().is_err());
        assert!(register_request("Ada", "a@b.co", &"x".repeat(73)).validate().is_err());
    }

    #[test]
    fn test_validation_errors_map_to_validation_error() {
        let err: AppError = register_request("Ada", "not-an-email", "hunter22")
            .validate()
            .unwrap_err()
            .into();
        match err {
            AppError::ValidationError(message) => {
                assert_eq!(message, "A valid email address is required")
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_reset_request_needs_a_token() {
        let request = ResetPasswordRequest {
            token: " ".into(),
            password: "hunter22".into(),
        };
        assert!(request.validate().is_err());
    }
}
