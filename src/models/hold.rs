use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An order created with the payment gateway. `amount` is in minor units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOrder {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
}

/// A provisional seat reservation. Counts against capacity until it is
/// converted into a ticket, released, or expires.
#[derive(Debug, Clone, PartialEq)]
pub struct SeatHold {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub price: Decimal,
    pub order: Option<PaymentOrder>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SeatHold {
    pub fn new(event_id: Uuid, user_id: Uuid, price: Decimal, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            event_id,
            user_id,
            price,
            order: None,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
