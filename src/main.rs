use std::sync::Arc;

use dotenvy::dotenv;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use eventsphere_server::config::{Config, DEFAULT_LOG_FILTER};
use eventsphere_server::jobs::start_scheduler;
use eventsphere_server::routes::create_routes;
use eventsphere_server::services::notify::mailer_from_config;
use eventsphere_server::services::payment::HttpPaymentGateway;
use eventsphere_server::state::AppState;
use eventsphere_server::store::{MemoryStore, PgStore, Store};

#[tokio::main]
async fn main() {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let config = Config::from_env().expect("Invalid configuration");

    let store: Arc<dyn Store> = match &config.database.url {
        Some(url) => {
            let store = PgStore::connect(url, config.database.max_connections)
                .await
                .expect("Failed to connect to database");
            tracing::info!("Successfully connected to database");

            store.migrate().await.expect("Failed to run migrations");
            tracing::info!("Migrations run successfully");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store (data is lost on exit)");
            Arc::new(MemoryStore::new())
        }
    };

    let gateway = HttpPaymentGateway::new(&config.payment).expect("Failed to build payment gateway");
    if config.payment.key_id.is_empty() || config.payment.key_secret.is_empty() {
        tracing::warn!("PAYMENT_KEY_ID/PAYMENT_KEY_SECRET not set, paid registrations will fail");
    }
    let mailer = mailer_from_config(&config.mail).expect("Failed to configure mail transport");

    let addr = config.server.bind_addr;
    let jobs = config.jobs.clone();
    let state = AppState::new(config, store, Arc::new(gateway), mailer);

    if jobs.enabled {
        start_scheduler(&state, &jobs);
    } else {
        tracing::info!("Background jobs disabled");
    }

    let app = create_routes(state);

    tracing::info!("🚀 Server running at http://{}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app).await.expect("Server failed");
}
