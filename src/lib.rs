pub mod auth;
pub mod config;
pub mod handlers;
pub mod jobs;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
pub mod utils;
