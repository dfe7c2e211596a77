use axum::{
    extract::State,
    response::Response,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::handlers::{ApiJson, ApiPath, ValidatedJson};
use crate::models::{Role, Ticket};
use crate::state::AppState;
use crate::utils::error::AppResult;
use crate::utils::response::{empty_success, success};
use crate::utils::validation::not_blank;

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(
        custom(function = "not_blank", message = "Name is required"),
        length(max = 100, message = "Name must be at most 100 characters")
    )]
    pub name: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,

    #[validate(length(min = 6, max = 72, message = "Password must be between 6 and 72 characters"))]
    pub new_password: String,
}

#[derive(Deserialize)]
pub struct SetRoleRequest {
    pub role: Role,
}

#[derive(Serialize)]
pub(crate) struct TicketsPayload {
    pub tickets: Vec<Ticket>,
}

pub async fn get_profile(AuthUser(account): AuthUser) -> Response {
    success(account.view(), "Profile retrieved")
}

pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(account): AuthUser,
    ValidatedJson(body): ValidatedJson<UpdateProfileRequest>,
) -> AppResult<Response> {
    let updated = state.identity.update_profile(account.id, &body.name).await?;
    Ok(success(updated.view(), "Profile updated"))
}

pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(account): AuthUser,
    ValidatedJson(body): ValidatedJson<ChangePasswordRequest>,
) -> AppResult<Response> {
    state
        .identity
        .change_password(account.id, &body.current_password, &body.new_password)
        .await?;
    Ok(empty_success("Password changed"))
}

pub async fn set_role(
    State(state): State<AppState>,
    AuthUser(admin): AuthUser,
    ApiPath(user_id): ApiPath<Uuid>,
    ApiJson(body): ApiJson<SetRoleRequest>,
) -> AppResult<Response> {
    let updated = state.identity.set_role(&admin, user_id, body.role).await?;
    Ok(success(updated.view(), "Role updated"))
}

pub async fn my_tickets(
    State(state): State<AppState>,
    AuthUser(account): AuthUser,
) -> AppResult<Response> {
    let tickets = state.tickets.list_for_user(account.id).await?;
    Ok(success(TicketsPayload { tickets }, "Tickets retrieved"))
}

pub async fn upcoming_tickets(
    State(state): State<AppState>,
    AuthUser(account): AuthUser,
) -> AppResult<Response> {
    let tickets = state.tickets.list_upcoming_for_user(account.id).await?;
    Ok(success(TicketsPayload { tickets }, "Upcoming tickets retrieved"))
}

pub async fn past_tickets(
    State(state): State<AppState>,
    AuthUser(account): AuthUser,
) -> AppResult<Response> {
    let tickets = state.tickets.list_past_for_user(account.id).await?;
    Ok(success(TicketsPayload { tickets }, "Past tickets retrieved"))
}
