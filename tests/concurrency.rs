mod common;

use std::collections::HashSet;
use std::sync::Arc;

use axum::http::{Method, StatusCode};

use common::{error_code, TestApp};
use eventsphere_server::models::Role;
use eventsphere_server::store::Store;

async fn register_all(app: Arc<TestApp>, event_id: uuid::Uuid, tokens: Vec<String>) -> Vec<(StatusCode, serde_json::Value)> {
    let uri = format!("/api/events/{}/register", event_id);
    let handles: Vec<_> = tokens
        .into_iter()
        .map(|token| {
            let app = app.clone();
            let uri = uri.clone();
            tokio::spawn(async move { app.request(Method::POST, &uri, Some(&token), None).await })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registrations_never_oversell() {
    let app = Arc::new(TestApp::new());
    let organizer = app.seed_account(Role::Organizer).await;
    let event_id = app.create_event(&organizer, 5, "0").await;

    let mut tokens = Vec::new();
    for _ in 0..30 {
        tokens.push(app.seed_account(Role::Student).await.token);
    }

    let results = register_all(app.clone(), event_id, tokens).await;
    let created = results.iter().filter(|(s, _)| *s == StatusCode::CREATED).count();
    let full = results
        .iter()
        .filter(|(s, b)| *s == StatusCode::CONFLICT && error_code(b) == "EVENT_FULL")
        .count();

    assert_eq!(created, 5);
    assert_eq!(full, 25);

    let event = app.ctx.store.find_event(event_id).await.unwrap().unwrap();
    assert_eq!(event.attendees.len(), 5);
    assert_eq!(event.reserved_seats, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_user_racing_gets_one_ticket() {
    let app = Arc::new(TestApp::new());
    let organizer = app.seed_account(Role::Organizer).await;
    let student = app.seed_account(Role::Student).await;
    let event_id = app.create_event(&organizer, 10, "0").await;

    let results = register_all(app.clone(), event_id, vec![student.token.clone(); 8]).await;
    let created = results.iter().filter(|(s, _)| *s == StatusCode::CREATED).count();
    assert_eq!(created, 1);
    assert!(results
        .iter()
        .filter(|(s, _)| *s != StatusCode::CREATED)
        .all(|(s, b)| *s == StatusCode::CONFLICT && error_code(b) == "ALREADY_REGISTERED"));

    let tickets = app.ctx.store.list_tickets_for_user(student.id).await.unwrap();
    assert_eq!(tickets.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ticket_numbers_stay_unique() {
    let app = Arc::new(TestApp::new());
    let organizer = app.seed_account(Role::Organizer).await;
    let event_id = app.create_event(&organizer, 60, "0").await;

    let mut tokens = Vec::new();
    for _ in 0..60 {
        tokens.push(app.seed_account(Role::Student).await.token);
    }

    let results = register_all(app.clone(), event_id, tokens).await;
    let numbers: HashSet<String> = results
        .iter()
        .map(|(status, body)| {
            assert_eq!(*status, StatusCode::CREATED, "{}", body);
            body["data"]["ticket"]["ticketNumber"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(numbers.len(), 60);
}
