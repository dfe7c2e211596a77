//! In-process stand-ins for the payment gateway and the mail transport.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::config::Config;
use crate::models::PaymentOrder;
use crate::services::notify::{Mailer, NotifyError, OutgoingMail, RetryPolicy};
use crate::services::payment::{self, to_minor_units, PaymentGateway};
use crate::state::AppState;
use crate::store::MemoryStore;
use crate::utils::error::{AppError, AppResult};

/// Issues sequential order ids and checks real HMAC signatures.
pub struct FakeGateway {
    secret: String,
    next_order: AtomicU64,
    fail_orders: AtomicBool,
    orders: Mutex<Vec<PaymentOrder>>,
}

impl FakeGateway {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            next_order: AtomicU64::new(1),
            fail_orders: AtomicBool::new(false),
            orders: Mutex::new(Vec::new()),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_orders.store(failing, Ordering::SeqCst);
    }

    pub fn orders_created(&self) -> usize {
        self.orders.lock().map(|o| o.len()).unwrap_or_default()
    }

    /// The signature a client would receive from the checkout widget.
    pub fn sign(&self, order_id: &str, payment_id: &str) -> String {
        payment::sign(&self.secret, order_id, payment_id).unwrap_or_default()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_order(
        &self,
        amount: Decimal,
        currency: &str,
        receipt: &str,
    ) -> AppResult<PaymentOrder> {
        if self.fail_orders.load(Ordering::SeqCst) {
            return Err(AppError::PaymentGatewayError("gateway unavailable".to_string()));
        }

        let order = PaymentOrder {
            id: format!("order_{}", self.next_order.fetch_add(1, Ordering::SeqCst)),
            amount: to_minor_units(amount)?,
            currency: currency.to_string(),
            receipt: receipt.to_string(),
        };
        if let Ok(mut orders) = self.orders.lock() {
            orders.push(order.clone());
        }
        Ok(order)
    }

    async fn confirm_payment(
        &self,
        order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> AppResult<bool> {
        payment::verify_signature(&self.secret, order_id, payment_id, signature)
    }
}

/// Keeps every message it is asked to send.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutgoingMail>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Background deliveries land asynchronously; poll until `count` arrive.
    pub async fn wait_for(&self, count: usize) -> Vec<OutgoingMail> {
        for _ in 0..100 {
            let sent = self.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.sent()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), NotifyError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(mail.clone());
        }
        Ok(())
    }
}

pub struct TestContext {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<FakeGateway>,
    pub mailer: Arc<RecordingMailer>,
}

/// Application state over a fresh in-memory store with default test config.
pub fn test_context() -> TestContext {
    test_context_with(Config::default())
}

pub fn test_context_with(config: Config) -> TestContext {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(FakeGateway::new(config.payment.key_secret.clone()));
    let mailer = Arc::new(RecordingMailer::default());
    let retry = RetryPolicy {
        attempts: 3,
        initial_backoff: Duration::from_millis(1),
    };
    let state = AppState::with_retry(config, store.clone(), gateway.clone(), mailer.clone(), retry);

    TestContext {
        state,
        store,
        gateway,
        mailer,
    }
}
