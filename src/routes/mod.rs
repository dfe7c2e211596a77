use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, create_security_headers_layer};
use crate::handlers::{auth, events, health_check, tickets, users};
use crate::state::AppState;

pub fn create_routes(state: AppState) -> Router {
    let server = state.config.server.clone();

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/auth", auth_routes())
        .nest("/api/users", user_routes())
        .nest("/api/events", event_routes())
        .nest("/api/tickets", ticket_routes())
        .with_state(state)
        .layer(create_security_headers_layer(&server))
        .layer(create_cors_layer(&server))
        .layer(TraceLayer::new_for_http())
}

fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/me", get(auth::me))
        .route("/forgot-password", post(auth::forgot_password))
        .route("/reset-password", post(auth::reset_password))
}

fn user_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/profile",
            get(users::get_profile).put(users::update_profile),
        )
        .route("/password", put(users::change_password))
        .route("/:id/role", put(users::set_role))
        .route("/tickets", get(users::my_tickets))
        .route("/tickets/upcoming", get(users::upcoming_tickets))
        .route("/tickets/past", get(users::past_tickets))
}

fn event_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(events::list_events).post(events::create_event))
        .route("/verify-payment", post(events::verify_payment))
        .route(
            "/:id",
            get(events::get_event)
                .put(events::update_event)
                .delete(events::delete_event),
        )
        .route("/:id/register", post(events::register_for_event))
        .route("/:id/feedback", post(events::submit_feedback))
        .route("/:id/tickets", get(events::event_tickets))
}

fn ticket_routes() -> Router<AppState> {
    Router::new()
        .route("/:id", get(tickets::get_ticket))
        .route("/:id/cancel", post(tickets::cancel_ticket))
        .route("/:id/check-in", post(tickets::check_in_ticket))
}
