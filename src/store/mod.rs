//! Persistence for accounts, events, seat holds and tickets.
//!
//! Every operation that touches more than one collection (converting a hold
//! into a ticket, cancelling a ticket, deleting an event) is a single call on
//! [`Store`] so that implementations can make it atomic: a transaction in
//! [`PgStore`], one write-lock section in [`MemoryStore`].
//!
//! Anything in [`PgStore`] that changes `reserved_seats` locks the event row
//! before it touches `seat_holds` or `tickets`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Account, Event, EventFilter, EventStatus, Feedback, PaymentOrder, SeatHold, Ticket,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const EMAIL_UNIQUE: &str = "accounts_email_key";
pub const TICKET_NUMBER_UNIQUE: &str = "tickets_ticket_number_key";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Missing record: {0}")]
    Missing(&'static str),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Database error")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn is_unique_violation(&self, constraint: &str) -> bool {
        matches!(self, StoreError::UniqueViolation(c) if c == constraint)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of an atomic seat reservation attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Reservation {
    /// A new hold was inserted and counts against capacity.
    Reserved(SeatHold),
    /// The user already holds a live seat for this event.
    Pending(SeatHold),
    AlreadyRegistered,
    Full,
    Closed(EventStatus),
    EventNotFound,
}

/// Outcome of turning a seat hold into a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    Issued,
    /// The event stopped accepting registrations; the hold was released.
    EventClosed(EventStatus),
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    // Accounts
    async fn insert_account(&self, account: &Account) -> StoreResult<()>;
    async fn find_account(&self, id: Uuid) -> StoreResult<Option<Account>>;
    async fn find_account_by_email(&self, email: &str) -> StoreResult<Option<Account>>;
    async fn find_account_by_reset_token(&self, token_hash: &str) -> StoreResult<Option<Account>>;
    /// Writes scalar fields only; event id lists are maintained by the
    /// compound operations below.
    async fn update_account(&self, account: &Account) -> StoreResult<()>;

    // Events
    /// Inserts the event and appends it to the organizer's created list.
    async fn insert_event(&self, event: &Event) -> StoreResult<()>;
    async fn find_event(&self, id: Uuid) -> StoreResult<Option<Event>>;
    async fn list_events(&self, filter: &EventFilter) -> StoreResult<Vec<Event>>;
    /// Returns `false` when the new capacity is below the reserved seat count.
    /// Moving to a status that refuses registrations releases every live hold.
    async fn update_event(&self, event: &Event) -> StoreResult<bool>;
    /// Removes the event, its holds and attendees, cancels its tickets and
    /// unlinks it from every account. Returns `false` if it did not exist.
    async fn delete_event(&self, id: Uuid) -> StoreResult<bool>;
    async fn upsert_feedback(&self, event_id: Uuid, feedback: &Feedback) -> StoreResult<()>;
    /// Flips open events dated before `now` to completed and releases their holds.
    async fn complete_past_events(&self, now: DateTime<Utc>) -> StoreResult<u64>;

    // Seat holds
    /// Checks status, duplicates and capacity and inserts `hold` in one
    /// atomic step. An expired hold of the same user is replaced.
    async fn reserve_seat(&self, hold: SeatHold, now: DateTime<Utc>) -> StoreResult<Reservation>;
    async fn attach_order(&self, hold_id: Uuid, order: &PaymentOrder) -> StoreResult<bool>;
    async fn find_hold_by_order(&self, order_id: &str) -> StoreResult<Option<SeatHold>>;
    async fn release_hold(&self, hold_id: Uuid) -> StoreResult<bool>;
    async fn release_expired_holds(&self, now: DateTime<Utc>) -> StoreResult<u64>;
    /// Consumes the hold and writes the ticket, the attendee entry and the
    /// account's registered-events entry together. A ticket number clash
    /// leaves everything untouched and reports [`TICKET_NUMBER_UNIQUE`].
    async fn convert_hold(&self, hold_id: Uuid, ticket: &Ticket) -> StoreResult<Conversion>;

    // Tickets
    async fn find_ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>>;
    async fn find_active_ticket(&self, event_id: Uuid, user_id: Uuid) -> StoreResult<Option<Ticket>>;
    async fn list_tickets_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Ticket>>;
    async fn list_tickets_for_event(&self, event_id: Uuid) -> StoreResult<Vec<Ticket>>;
    /// `active -> used`. Returns `false` if the ticket was not active.
    async fn mark_ticket_used(&self, id: Uuid) -> StoreResult<bool>;
    /// `active -> cancelled`, dropping the attendee entry and freeing the
    /// seat. Returns `false` if the ticket was not active.
    async fn cancel_ticket(&self, id: Uuid) -> StoreResult<bool>;
    /// Active tickets without a reminder for open events dated in `[from, to)`.
    async fn tickets_due_for_reminder(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Ticket>>;
    async fn mark_reminded(&self, ticket_id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;
}
