//! `PgStore` against a real PostgreSQL.
//!
//! Ignored by default because they need a database. Point `DATABASE_URL` at a
//! scratch database (migrations run on connect) and run:
//!
//! ```bash
//! cargo test --test postgres_store -- --ignored
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use eventsphere_server::config::Config;
use eventsphere_server::models::{
    Account, Event, EventCategory, EventPatch, EventStatus, NewEvent, Role, SeatHold, Ticket,
    TicketStatus,
};
use eventsphere_server::services::notify::RetryPolicy;
use eventsphere_server::services::registration::{PaymentConfirmation, RegistrationResult};
use eventsphere_server::state::AppState;
use eventsphere_server::store::{Conversion, PgStore, Store, TICKET_NUMBER_UNIQUE};
use eventsphere_server::test_helpers::{FakeGateway, RecordingMailer};
use eventsphere_server::utils::error::AppError;

struct PgContext {
    pool: PgPool,
    store: Arc<PgStore>,
    state: AppState,
    gateway: Arc<FakeGateway>,
}

async fn pg_context() -> PgContext {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for Postgres tests");
    let pool = PgPoolOptions::new()
        .max_connections(16)
        .connect(&url)
        .await
        .expect("Failed to connect to Postgres");
    let store = Arc::new(PgStore::from_pool(pool.clone()));
    store.migrate().await.expect("Failed to run migrations");

    let config = Config::default();
    let gateway = Arc::new(FakeGateway::new(config.payment.key_secret.clone()));
    let retry = RetryPolicy {
        attempts: 1,
        initial_backoff: StdDuration::from_millis(1),
    };
    let state = AppState::with_retry(
        config,
        store.clone(),
        gateway.clone(),
        Arc::new(RecordingMailer::default()),
        retry,
    );

    PgContext {
        pool,
        store,
        state,
        gateway,
    }
}

async fn account(ctx: &PgContext, role: Role) -> Account {
    let account = Account::new(
        "Pg Member".into(),
        format!("{}@example.com", Uuid::new_v4().simple()),
        "not-a-real-hash".into(),
        role,
    );
    ctx.store.insert_account(&account).await.unwrap();
    account
}

async fn event(ctx: &PgContext, capacity: i32, price: Decimal) -> Event {
    let organizer = account(ctx, Role::Organizer).await;
    ctx.state
        .catalog
        .create(
            organizer.id,
            NewEvent {
                title: "Database Day".into(),
                description: String::new(),
                date: Utc::now() + Duration::days(5),
                time: "10:00".into(),
                location: "Lab 2".into(),
                category: EventCategory::Technical,
                capacity,
                ticket_price: price,
                registration_deadline: None,
            },
        )
        .await
        .unwrap()
}

async fn register_all(
    ctx: &PgContext,
    event_id: Uuid,
    users: Vec<Uuid>,
) -> Vec<Result<RegistrationResult, AppError>> {
    let handles: Vec<_> = users
        .into_iter()
        .map(|user_id| {
            let registrations = ctx.state.registrations.clone();
            tokio::spawn(async move { registrations.register(event_id, user_id).await })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

fn ticket_for(hold: &SeatHold, number: &str) -> Ticket {
    Ticket {
        id: Uuid::new_v4(),
        event_id: hold.event_id,
        user_id: hold.user_id,
        payment_id: None,
        ticket_number: number.to_string(),
        qr_payload: "{}".to_string(),
        status: TicketStatus::Active,
        price: hold.price,
        purchased_at: Utc::now(),
        reminder_sent_at: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn test_pg_concurrent_registrations_never_oversell() {
    let ctx = pg_context().await;
    let event = event(&ctx, 5, Decimal::ZERO).await;
    let mut users = Vec::new();
    for _ in 0..30 {
        users.push(account(&ctx, Role::Student).await.id);
    }

    let results = register_all(&ctx, event.id, users).await;
    let created = results
        .iter()
        .filter(|r| matches!(r, Ok(RegistrationResult::Ticketed(_))))
        .count();
    let full = results.iter().filter(|r| matches!(r, Err(AppError::EventFull))).count();
    assert_eq!(created, 5);
    assert_eq!(full, 25);

    let stored = ctx.store.find_event(event.id).await.unwrap().unwrap();
    assert_eq!(stored.attendees.len(), 5);
    assert_eq!(stored.reserved_seats, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn test_pg_same_user_racing_gets_one_ticket() {
    let ctx = pg_context().await;
    let event = event(&ctx, 10, Decimal::ZERO).await;
    let student = account(&ctx, Role::Student).await;

    let results = register_all(&ctx, event.id, vec![student.id; 8]).await;
    let created = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(created, 1);
    assert!(results
        .iter()
        .filter(|r| r.is_err())
        .all(|r| matches!(r, Err(AppError::AlreadyRegistered))));

    let tickets = ctx.store.list_tickets_for_user(student.id).await.unwrap();
    assert_eq!(tickets.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn test_pg_ticket_numbers_stay_unique() {
    let ctx = pg_context().await;
    let event = event(&ctx, 40, Decimal::ZERO).await;
    let mut users = Vec::new();
    for _ in 0..40 {
        users.push(account(&ctx, Role::Student).await.id);
    }

    let results = register_all(&ctx, event.id, users).await;
    let numbers: HashSet<String> = results
        .into_iter()
        .map(|r| match r {
            Ok(RegistrationResult::Ticketed(ticket)) => ticket.ticket_number,
            other => panic!("unexpected outcome: {:?}", other),
        })
        .collect();
    assert_eq!(numbers.len(), 40);
}

#[tokio::test]
#[ignore]
async fn test_pg_ticket_number_clash_rolls_back() {
    let ctx = pg_context().await;
    let event = event(&ctx, 3, Decimal::ZERO).await;
    let a = account(&ctx, Role::Student).await;
    let b = account(&ctx, Role::Student).await;

    let hold_a = SeatHold::new(event.id, a.id, Decimal::ZERO, Duration::minutes(5));
    let hold_b = SeatHold::new(event.id, b.id, Decimal::ZERO, Duration::minutes(5));
    ctx.store.reserve_seat(hold_a.clone(), Utc::now()).await.unwrap();
    ctx.store.reserve_seat(hold_b.clone(), Utc::now()).await.unwrap();

    let number = format!("TKT-PG-{}", Uuid::new_v4().simple());
    let outcome = ctx.store.convert_hold(hold_a.id, &ticket_for(&hold_a, &number)).await.unwrap();
    assert_eq!(outcome, Conversion::Issued);

    let err = ctx
        .store
        .convert_hold(hold_b.id, &ticket_for(&hold_b, &number))
        .await
        .unwrap_err();
    assert!(err.is_unique_violation(TICKET_NUMBER_UNIQUE));

    // The failed conversion kept b's hold and wrote nothing.
    let stored = ctx.store.find_event(event.id).await.unwrap().unwrap();
    assert_eq!(stored.attendees.len(), 1);
    assert_eq!(stored.reserved_seats, 2);
    assert!(ctx.store.release_hold(hold_b.id).await.unwrap());
}

#[tokio::test]
#[ignore]
async fn test_pg_one_active_ticket_per_user_and_event() {
    let ctx = pg_context().await;
    let event = event(&ctx, 3, Decimal::ZERO).await;
    let student = account(&ctx, Role::Student).await;
    ctx.state.registrations.register(event.id, student.id).await.unwrap();

    let duplicate = sqlx::query(
        "INSERT INTO tickets (id, event_id, user_id, ticket_number, qr_payload, status, price, \
         purchased_at) VALUES ($1, $2, $3, $4, '{}', 'active', 0, NOW())",
    )
    .bind(Uuid::new_v4())
    .bind(event.id)
    .bind(student.id)
    .bind(format!("TKT-DUP-{}", Uuid::new_v4().simple()))
    .execute(&ctx.pool)
    .await;
    let err = duplicate.unwrap_err();
    let db_err = err.as_database_error().expect("expected a database error");
    assert!(db_err.is_unique_violation());
}

#[tokio::test]
#[ignore]
async fn test_pg_cancel_ticket_frees_seat() {
    let ctx = pg_context().await;
    let event = event(&ctx, 1, Decimal::ZERO).await;
    let student = account(&ctx, Role::Student).await;
    let other = account(&ctx, Role::Student).await;

    let RegistrationResult::Ticketed(ticket) =
        ctx.state.registrations.register(event.id, student.id).await.unwrap()
    else {
        panic!("free events issue tickets directly");
    };
    assert!(ctx.store.cancel_ticket(ticket.id).await.unwrap());
    assert!(!ctx.store.cancel_ticket(ticket.id).await.unwrap());

    let stored = ctx.store.find_event(event.id).await.unwrap().unwrap();
    assert!(stored.attendees.is_empty());
    assert_eq!(stored.reserved_seats, 0);
    let student = ctx.store.find_account(student.id).await.unwrap().unwrap();
    assert!(student.registered_events.is_empty());

    assert!(ctx.state.registrations.register(event.id, other.id).await.is_ok());
}

#[tokio::test]
#[ignore]
async fn test_pg_closing_event_voids_open_payment() {
    let ctx = pg_context().await;
    let event = event(&ctx, 2, Decimal::new(1500, 2)).await;
    let student = account(&ctx, Role::Student).await;

    let RegistrationResult::PaymentRequired { order, .. } =
        ctx.state.registrations.register(event.id, student.id).await.unwrap()
    else {
        panic!("paid events open an order");
    };

    let patch = EventPatch {
        status: Some(EventStatus::Cancelled),
        ..Default::default()
    };
    let cancelled = ctx.state.catalog.update(event.id, event.organizer_id, patch).await.unwrap();
    assert_eq!(cancelled.reserved_seats, 0);

    let confirmation = PaymentConfirmation {
        order_id: order.id.clone(),
        payment_id: "pay_pg".into(),
        signature: ctx.gateway.sign(&order.id, "pay_pg"),
    };
    let result = ctx
        .state
        .registrations
        .confirm_payment(event.id, student.id, confirmation)
        .await;
    assert!(matches!(result, Err(AppError::EventClosed(_))));
    assert!(ctx.store.find_active_ticket(event.id, student.id).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn test_pg_sweep_and_reregistration_do_not_deadlock() {
    let ctx = pg_context().await;
    let event = event(&ctx, 20, Decimal::ZERO).await;

    let mut users = Vec::new();
    for _ in 0..10 {
        let user = account(&ctx, Role::Student).await;
        let stale = SeatHold::new(event.id, user.id, Decimal::ZERO, Duration::minutes(-1));
        ctx.store
            .reserve_seat(stale, Utc::now() - Duration::minutes(2))
            .await
            .unwrap();
        users.push(user.id);
    }

    let sweeper = {
        let store = ctx.store.clone();
        tokio::spawn(async move {
            for _ in 0..10 {
                store.release_expired_holds(Utc::now()).await.unwrap();
            }
        })
    };
    let results = register_all(&ctx, event.id, users).await;
    sweeper.await.unwrap();

    assert!(results.iter().all(|r| r.is_ok()), "{:?}", results);
    let stored = ctx.store.find_event(event.id).await.unwrap().unwrap();
    assert_eq!(stored.attendees.len(), 10);
    assert_eq!(stored.reserved_seats, 10);
}
