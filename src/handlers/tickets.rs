use axum::{
    extract::State,
    response::Response,
};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::handlers::ApiPath;
use crate::state::AppState;
use crate::utils::error::AppResult;
use crate::utils::response::success;

pub async fn get_ticket(
    State(state): State<AppState>,
    AuthUser(account): AuthUser,
    ApiPath(ticket_id): ApiPath<Uuid>,
) -> AppResult<Response> {
    let ticket = state.tickets.find_for(&account, ticket_id).await?;
    Ok(success(ticket, "Ticket retrieved"))
}

pub async fn cancel_ticket(
    State(state): State<AppState>,
    AuthUser(account): AuthUser,
    ApiPath(ticket_id): ApiPath<Uuid>,
) -> AppResult<Response> {
    let ticket = state.tickets.cancel(&account, ticket_id).await?;
    Ok(success(ticket, "Ticket cancelled"))
}

pub async fn check_in_ticket(
    State(state): State<AppState>,
    AuthUser(account): AuthUser,
    ApiPath(ticket_id): ApiPath<Uuid>,
) -> AppResult<Response> {
    let ticket = state.tickets.mark_used(&account, ticket_id).await?;
    Ok(success(ticket, "Ticket checked in"))
}
