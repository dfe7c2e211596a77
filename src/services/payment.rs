use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, error};

use crate::config::PaymentConfig;
use crate::models::PaymentOrder;
use crate::utils::error::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// `amount` is in major units; the gateway order carries minor units.
    async fn create_order(
        &self,
        amount: Decimal,
        currency: &str,
        receipt: &str,
    ) -> AppResult<PaymentOrder>;

    async fn confirm_payment(
        &self,
        order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> AppResult<bool>;
}

pub fn to_minor_units(amount: Decimal) -> AppResult<i64> {
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .filter(|minor| *minor > 0)
        .ok_or_else(|| AppError::ValidationError(format!("Invalid payment amount: {}", amount)))
}

/// Hex HMAC-SHA256 of `"<order_id>|<payment_id>"`.
pub fn sign(secret: &str, order_id: &str, payment_id: &str) -> AppResult<String> {
    let mac = keyed_mac(secret, order_id, payment_id)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub fn verify_signature(
    secret: &str,
    order_id: &str,
    payment_id: &str,
    signature: &str,
) -> AppResult<bool> {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return Ok(false);
    };
    let mac = keyed_mac(secret, order_id, payment_id)?;
    // Constant-time comparison.
    Ok(mac.verify_slice(&expected).is_ok())
}

fn keyed_mac(secret: &str, order_id: &str, payment_id: &str) -> AppResult<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::InternalServerError(format!("Invalid signing key: {}", e)))?;
    mac.update(format!("{}|{}", order_id, payment_id).as_bytes());
    Ok(mac)
}

#[derive(Serialize)]
struct CreateOrderRequest<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
}

#[derive(Deserialize)]
struct CreateOrderResponse {
    id: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    receipt: Option<String>,
}

/// Talks to a Razorpay-compatible orders API.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl HttpPaymentGateway {
    pub fn new(config: &PaymentConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AppError::InternalServerError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            key_id: config.key_id.clone(),
            key_secret: config.key_secret.clone(),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_order(
        &self,
        amount: Decimal,
        currency: &str,
        receipt: &str,
    ) -> AppResult<PaymentOrder> {
        let body = CreateOrderRequest {
            amount: to_minor_units(amount)?,
            currency,
            receipt,
        };
        let url = format!("{}/orders", self.base_url);
        debug!(url = %url, amount = body.amount, currency, receipt, "Creating payment order");

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::PaymentGatewayError(format!("Order request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!(status = %status, body = %text, "Payment gateway rejected order");
            return Err(AppError::PaymentGatewayError(format!(
                "Order creation returned {}",
                status
            )));
        }

        let order: CreateOrderResponse = response
            .json()
            .await
            .map_err(|e| AppError::PaymentGatewayError(format!("Unreadable order response: {}", e)))?;

        Ok(PaymentOrder {
            id: order.id,
            amount: order.amount,
            currency: order.currency,
            receipt: order.receipt.unwrap_or_else(|| receipt.to_string()),
        })
    }

    async fn confirm_payment(
        &self,
        order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> AppResult<bool> {
        verify_signature(&self.key_secret, order_id, payment_id, signature)
    }
}
