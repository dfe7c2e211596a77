use axum::{extract::State, response::Response};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::auth::{policy, AuthUser, Capability};
use crate::handlers::users::TicketsPayload;
use crate::handlers::{ApiJson, ApiPath, ApiQuery, ValidatedJson};
use crate::models::{
    EventFilter, EventPatch, EventView, NewEvent, NewFeedback, PaymentOrder, Ticket,
};
use crate::services::registration::{EventSummary, PaymentConfirmation, RegistrationResult};
use crate::state::AppState;
use crate::utils::error::AppResult;
use crate::utils::response::{created, empty_success, success};

#[derive(Serialize)]
struct EventsPayload {
    events: Vec<EventView>,
}

#[derive(Serialize)]
struct EventPayload {
    event: EventView,
}

#[derive(Serialize)]
struct TicketPayload {
    ticket: Ticket,
}

#[derive(Serialize)]
struct OrderPayload {
    order: PaymentOrder,
    event: EventSummary,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    pub event_id: Uuid,
    #[validate(length(min = 1, message = "Order id is required"))]
    pub order_id: String,
    #[validate(length(min = 1, message = "Payment id is required"))]
    pub payment_id: String,
    #[validate(length(min = 1, message = "Signature is required"))]
    pub signature: String,
}

pub async fn list_events(
    State(state): State<AppState>,
    ApiQuery(filter): ApiQuery<EventFilter>,
) -> AppResult<Response> {
    let events = state.catalog.list(&filter).await?;
    let events = events.iter().map(|e| e.view()).collect();
    Ok(success(EventsPayload { events }, "Events retrieved"))
}

pub async fn get_event(
    State(state): State<AppState>,
    ApiPath(event_id): ApiPath<Uuid>,
) -> AppResult<Response> {
    let event = state.catalog.get(event_id).await?;
    Ok(success(EventPayload { event: event.view() }, "Event retrieved"))
}

pub async fn create_event(
    State(state): State<AppState>,
    AuthUser(account): AuthUser,
    ApiJson(body): ApiJson<NewEvent>,
) -> AppResult<Response> {
    let event = state.catalog.create(account.id, body).await?;
    Ok(created(EventPayload { event: event.view() }, "Event created"))
}

pub async fn update_event(
    State(state): State<AppState>,
    AuthUser(account): AuthUser,
    ApiPath(event_id): ApiPath<Uuid>,
    ApiJson(patch): ApiJson<EventPatch>,
) -> AppResult<Response> {
    let event = state.catalog.update(event_id, account.id, patch).await?;
    Ok(success(EventPayload { event: event.view() }, "Event updated"))
}

pub async fn delete_event(
    State(state): State<AppState>,
    AuthUser(account): AuthUser,
    ApiPath(event_id): ApiPath<Uuid>,
) -> AppResult<Response> {
    state.catalog.delete(event_id, account.id).await?;
    Ok(empty_success("Event deleted"))
}

pub async fn register_for_event(
    State(state): State<AppState>,
    AuthUser(account): AuthUser,
    ApiPath(event_id): ApiPath<Uuid>,
) -> AppResult<Response> {
    policy::require(&account, Capability::RegisterForEvents)?;

    match state.registrations.register(event_id, account.id).await? {
        RegistrationResult::Ticketed(ticket) => {
            Ok(created(TicketPayload { ticket }, "Registered successfully"))
        }
        RegistrationResult::PaymentRequired { order, event } => Ok(success(
            OrderPayload { order, event },
            "Complete the payment to confirm your seat",
        )),
    }
}

pub async fn verify_payment(
    State(state): State<AppState>,
    AuthUser(account): AuthUser,
    ValidatedJson(body): ValidatedJson<VerifyPaymentRequest>,
) -> AppResult<Response> {
    let confirmation = PaymentConfirmation {
        order_id: body.order_id,
        payment_id: body.payment_id,
        signature: body.signature,
    };
    let ticket = state
        .registrations
        .confirm_payment(body.event_id, account.id, confirmation)
        .await?;

    Ok(created(TicketPayload { ticket }, "Payment verified, ticket issued"))
}

pub async fn submit_feedback(
    State(state): State<AppState>,
    AuthUser(account): AuthUser,
    ApiPath(event_id): ApiPath<Uuid>,
    ApiJson(body): ApiJson<NewFeedback>,
) -> AppResult<Response> {
    let event = state.catalog.submit_feedback(event_id, account.id, body).await?;
    Ok(success(EventPayload { event: event.view() }, "Feedback recorded"))
}

pub async fn event_tickets(
    State(state): State<AppState>,
    AuthUser(account): AuthUser,
    ApiPath(event_id): ApiPath<Uuid>,
) -> AppResult<Response> {
    let tickets = state.tickets.list_for_event(&account, event_id).await?;
    Ok(success(TicketsPayload { tickets }, "Event tickets retrieved"))
}
