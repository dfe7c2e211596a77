#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use eventsphere_server::auth::password::hash_password;
use eventsphere_server::config::Config;
use eventsphere_server::models::{Account, Role};
use eventsphere_server::routes::create_routes;
use eventsphere_server::store::Store;
use eventsphere_server::test_helpers::{test_context_with, TestContext};

pub struct TestApp {
    pub ctx: TestContext,
    pub router: Router,
}

pub struct Member {
    pub id: Uuid,
    pub email: String,
    pub token: String,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let ctx = test_context_with(config);
        let router = create_routes(ctx.state.clone());
        Self { ctx, router }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    /// Signs up through the API (students and organizers only).
    pub async fn sign_up(&self, role: &str) -> Member {
        let email = format!("{}@example.com", Uuid::new_v4().simple());
        let (status, body) = self
            .request(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({
                    "name": "Test Member",
                    "email": email,
                    "password": "password123",
                    "role": role,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "sign up failed: {}", body);

        Member {
            id: body["data"]["user"]["id"].as_str().unwrap().parse().unwrap(),
            email,
            token: body["data"]["token"].as_str().unwrap().to_string(),
        }
    }

    /// Seeds an account straight into the store, bypassing the API.
    pub async fn seed_account(&self, role: Role) -> Member {
        let email = format!("{}@example.com", Uuid::new_v4().simple());
        let hash = hash_password("password123", 4).await.unwrap();
        let account = Account::new("Seeded".into(), email.clone(), hash, role);
        self.ctx.store.insert_account(&account).await.unwrap();
        let token = self.ctx.state.identity.issue_session(&account).unwrap();

        Member {
            id: account.id,
            email,
            token,
        }
    }

    pub async fn create_event(&self, organizer: &Member, capacity: i32, price: &str) -> Uuid {
        let date = chrono::Utc::now() + chrono::Duration::days(10);
        let (status, body) = self
            .request(
                Method::POST,
                "/api/events",
                Some(&organizer.token),
                Some(json!({
                    "title": "Integration Summit",
                    "description": "All day",
                    "date": date,
                    "time": "09:00",
                    "location": "Auditorium",
                    "category": "technical",
                    "capacity": capacity,
                    "ticketPrice": price,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "event creation failed: {}", body);
        body["data"]["event"]["id"].as_str().unwrap().parse().unwrap()
    }
}

pub fn error_code(body: &Value) -> &str {
    body["error"]["code"].as_str().unwrap_or_default()
}
