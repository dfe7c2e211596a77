use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use super::{Conversion, Reservation, Store, StoreError, StoreResult};
use crate::models::{
    Account, Attendee, Event, EventCategory, EventFilter, EventStatus, Feedback, PaymentOrder,
    Role, SeatHold, Ticket, TicketStatus,
};

const HOLD_COLUMNS: &str = "id, event_id, user_id, price, order_id, order_amount, order_currency, \
                            order_receipt, created_at, expires_at";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!()
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    async fn hydrate(&self, rows: Vec<EventRow>) -> StoreResult<Vec<Event>> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

        let attendee_rows: Vec<AttendeeRow> = sqlx::query_as(
            "SELECT event_id, user_id, payment_id, ticket_id, registered_at \
             FROM event_attendees WHERE event_id = ANY($1) ORDER BY registered_at",
        )
        .bind(ids.as_slice())
        .fetch_all(&self.pool)
        .await?;

        let feedback_rows: Vec<FeedbackRow> = sqlx::query_as(
            "SELECT event_id, user_id, rating, comment, created_at \
             FROM event_feedback WHERE event_id = ANY($1) ORDER BY created_at",
        )
        .bind(ids.as_slice())
        .fetch_all(&self.pool)
        .await?;

        let mut attendees: HashMap<Uuid, Vec<Attendee>> = HashMap::new();
        for row in attendee_rows {
            attendees.entry(row.event_id).or_default().push(Attendee {
                user_id: row.user_id,
                payment_id: row.payment_id,
                ticket_id: row.ticket_id,
                registered_at: row.registered_at,
            });
        }
        let mut feedback: HashMap<Uuid, Vec<Feedback>> = HashMap::new();
        for row in feedback_rows {
            feedback.entry(row.event_id).or_default().push(Feedback {
                user_id: row.user_id,
                rating: row.rating,
                comment: row.comment,
                created_at: row.created_at,
            });
        }

        rows.into_iter()
            .map(|row| {
                let id = row.id;
                let mut event = Event::try_from(row)?;
                event.attendees = attendees.remove(&id).unwrap_or_default();
                event.feedback = feedback.remove(&id).unwrap_or_default();
                Ok(event)
            })
            .collect()
    }
}

/// Unique violations carry the constraint name so callers can tell an email
/// clash from a ticket-number clash.
fn map_db_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            let constraint = db_err.constraint().unwrap_or("unknown").to_string();
            return StoreError::UniqueViolation(constraint);
        }
    }
    StoreError::Database(err)
}

/// Locks the event row; `None` when the event does not exist.
async fn lock_event(conn: &mut PgConnection, event_id: Uuid) -> StoreResult<Option<EventStatus>> {
    let status: Option<String> =
        sqlx::query_scalar("SELECT status FROM events WHERE id = $1 FOR UPDATE")
            .bind(event_id)
            .fetch_optional(&mut *conn)
            .await?;
    status.as_deref().map(parse_status).transpose()
}

/// Drops every hold of the given (already locked) events and gives their
/// seats back.
async fn release_holds_for_events(conn: &mut PgConnection, event_ids: &[Uuid]) -> StoreResult<u64> {
    let released: Vec<i32> = sqlx::query_scalar(
        "WITH released AS (DELETE FROM seat_holds WHERE event_id = ANY($1) RETURNING event_id), \
         counts AS (SELECT event_id, COUNT(*)::int AS n FROM released GROUP BY event_id) \
         UPDATE events e SET reserved_seats = e.reserved_seats - counts.n \
         FROM counts WHERE e.id = counts.event_id RETURNING counts.n",
    )
    .bind(event_ids)
    .fetch_all(&mut *conn)
    .await?;
    Ok(released.into_iter().map(|n| n as u64).sum())
}

#[derive(Debug, FromRow)]
struct AccountRow {
    id: Uuid,
    name: String,
    email: String,
    password_hash: String,
    role: String,
    registered_events: Vec<Uuid>,
    created_events: Vec<Uuid>,
    reset_token_hash: Option<String>,
    reset_token_expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        let role = Role::parse(&row.role)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown role '{}'", row.role)))?;
        Ok(Account {
            id: row.id,
            name: row.name,
            email: row.email,
            password_hash: row.password_hash,
            role,
            registered_events: row.registered_events,
            created_events: row.created_events,
            reset_token_hash: row.reset_token_hash,
            reset_token_expires_at: row.reset_token_expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct EventRow {
    id: Uuid,
    title: String,
    description: String,
    date: DateTime<Utc>,
    time: String,
    location: String,
    category: String,
    capacity: i32,
    ticket_price: Decimal,
    organizer_id: Uuid,
    status: String,
    registration_deadline: DateTime<Utc>,
    reserved_seats: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn parse_status(s: &str) -> StoreResult<EventStatus> {
    EventStatus::parse(s).ok_or_else(|| StoreError::Corrupt(format!("unknown event status '{s}'")))
}

impl TryFrom<EventRow> for Event {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let category = EventCategory::parse(&row.category)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown category '{}'", row.category)))?;
        Ok(Event {
            id: row.id,
            title: row.title,
            description: row.description,
            date: row.date,
            time: row.time,
            location: row.location,
            category,
            capacity: row.capacity,
            ticket_price: row.ticket_price,
            organizer_id: row.organizer_id,
            attendees: Vec::new(),
            feedback: Vec::new(),
            status: parse_status(&row.status)?,
            registration_deadline: row.registration_deadline,
            reserved_seats: row.reserved_seats,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AttendeeRow {
    event_id: Uuid,
    user_id: Uuid,
    payment_id: Option<String>,
    ticket_id: Uuid,
    registered_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct FeedbackRow {
    event_id: Uuid,
    user_id: Uuid,
    rating: i16,
    comment: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct HoldRow {
    id: Uuid,
    event_id: Uuid,
    user_id: Uuid,
    price: Decimal,
    order_id: Option<String>,
    order_amount: Option<i64>,
    order_currency: Option<String>,
    order_receipt: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl From<HoldRow> for SeatHold {
    fn from(row: HoldRow) -> Self {
        let order = match (row.order_id, row.order_amount, row.order_currency) {
            (Some(id), Some(amount), Some(currency)) => Some(PaymentOrder {
                id,
                amount,
                currency,
                receipt: row.order_receipt.unwrap_or_default(),
            }),
            _ => None,
        };
        SeatHold {
            id: row.id,
            event_id: row.event_id,
            user_id: row.user_id,
            price: row.price,
            order,
            created_at: row.created_at,
            expires_at: row.expires_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct TicketRow {
    id: Uuid,
    event_id: Uuid,
    user_id: Uuid,
    payment_id: Option<String>,
    ticket_number: String,
    qr_payload: String,
    status: String,
    price: Decimal,
    purchased_at: DateTime<Utc>,
    reminder_sent_at: Option<DateTime<Utc>>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        let status = TicketStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown ticket status '{}'", row.status)))?;
        Ok(Ticket {
            id: row.id,
            event_id: row.event_id,
            user_id: row.user_id,
            payment_id: row.payment_id,
            ticket_number: row.ticket_number,
            qr_payload: row.qr_payload,
            status,
            price: row.price,
            purchased_at: row.purchased_at,
            reminder_sent_at: row.reminder_sent_at,
        })
    }
}

fn tickets_from_rows(rows: Vec<TicketRow>) -> StoreResult<Vec<Ticket>> {
    rows.into_iter().map(Ticket::try_from).collect()
}

#[async_trait]
impl Store for PgStore {
    async fn insert_account(&self, account: &Account) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO accounts (id, name, email, password_hash, role, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(account.id)
        .bind(&account.name)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(account.role.as_str())
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(())
    }

    async fn find_account(&self, id: Uuid) -> StoreResult<Option<Account>> {
        let row: Option<AccountRow> = sqlx::query_as("SELECT * FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Account::try_from).transpose()
    }

    async fn find_account_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        let row: Option<AccountRow> = sqlx::query_as("SELECT * FROM accounts WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Account::try_from).transpose()
    }

    async fn find_account_by_reset_token(&self, token_hash: &str) -> StoreResult<Option<Account>> {
        let row: Option<AccountRow> =
            sqlx::query_as("SELECT * FROM accounts WHERE reset_token_hash = $1")
                .bind(token_hash)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Account::try_from).transpose()
    }

    async fn update_account(&self, account: &Account) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE accounts SET name = $2, password_hash = $3, role = $4, reset_token_hash = $5, \
             reset_token_expires_at = $6, updated_at = $7 WHERE id = $1",
        )
        .bind(account.id)
        .bind(&account.name)
        .bind(&account.password_hash)
        .bind(account.role.as_str())
        .bind(account.reset_token_hash.as_deref())
        .bind(account.reset_token_expires_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Missing("account"));
        }
        Ok(())
    }

    async fn insert_event(&self, event: &Event) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let linked = sqlx::query(
            "UPDATE accounts SET created_events = array_append(created_events, $2) WHERE id = $1",
        )
        .bind(event.organizer_id)
        .bind(event.id)
        .execute(&mut *tx)
        .await?;
        if linked.rows_affected() == 0 {
            return Err(StoreError::Missing("organizer"));
        }

        sqlx::query(
            "INSERT INTO events (id, title, description, date, time, location, category, capacity, \
             ticket_price, organizer_id, status, registration_deadline, reserved_seats, created_at, \
             updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 0, $13, $14)",
        )
        .bind(event.id)
        .bind(&event.title)
        .bind(&event.description)
        .bind(event.date)
        .bind(&event.time)
        .bind(&event.location)
        .bind(event.category.as_str())
        .bind(event.capacity)
        .bind(event.ticket_price)
        .bind(event.organizer_id)
        .bind(event.status.as_str())
        .bind(event.registration_deadline)
        .bind(event.created_at)
        .bind(event.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_event(&self, id: Uuid) -> StoreResult<Option<Event>> {
        let row: Option<EventRow> = sqlx::query_as("SELECT * FROM events WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_events(&self, filter: &EventFilter) -> StoreResult<Vec<Event>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT * FROM events WHERE ($1::text IS NULL OR category = $1) \
             AND ($2::text IS NULL OR status = $2) ORDER BY date",
        )
        .bind(filter.category.map(|c| c.as_str()))
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;
        self.hydrate(rows).await
    }

    async fn update_event(&self, event: &Event) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let reserved: Option<i32> =
            sqlx::query_scalar("SELECT reserved_seats FROM events WHERE id = $1 FOR UPDATE")
                .bind(event.id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(mut reserved) = reserved else {
            return Err(StoreError::Missing("event"));
        };

        if !event.status.accepts_registrations() {
            let held: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM seat_holds WHERE event_id = $1")
                .bind(event.id)
                .fetch_one(&mut *tx)
                .await?;
            reserved -= held as i32;
        }
        if event.capacity < reserved {
            return Ok(false);
        }
        if !event.status.accepts_registrations() {
            release_holds_for_events(&mut *tx, &[event.id]).await?;
        }

        sqlx::query(
            "UPDATE events SET title = $2, description = $3, date = $4, time = $5, location = $6, \
             category = $7, capacity = $8, ticket_price = $9, status = $10, \
             registration_deadline = $11, updated_at = $12 WHERE id = $1",
        )
        .bind(event.id)
        .bind(&event.title)
        .bind(&event.description)
        .bind(event.date)
        .bind(&event.time)
        .bind(&event.location)
        .bind(event.category.as_str())
        .bind(event.capacity)
        .bind(event.ticket_price)
        .bind(event.status.as_str())
        .bind(event.registration_deadline)
        .bind(event.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn delete_event(&self, id: Uuid) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        // Attendees, feedback and holds cascade.
        let deleted = sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query("UPDATE tickets SET status = 'cancelled' WHERE event_id = $1 AND status = 'active'")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE accounts SET registered_events = array_remove(registered_events, $1), \
             created_events = array_remove(created_events, $1) \
             WHERE $1 = ANY(registered_events) OR $1 = ANY(created_events)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn upsert_feedback(&self, event_id: Uuid, feedback: &Feedback) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO event_feedback (event_id, user_id, rating, comment, created_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (event_id, user_id) DO UPDATE \
             SET rating = EXCLUDED.rating, comment = EXCLUDED.comment, created_at = EXCLUDED.created_at",
        )
        .bind(event_id)
        .bind(feedback.user_id)
        .bind(feedback.rating)
        .bind(feedback.comment.as_deref())
        .bind(feedback.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_past_events(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM events WHERE status IN ('upcoming', 'ongoing') AND date < $1 \
             ORDER BY id FOR UPDATE",
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;
        if ids.is_empty() {
            return Ok(0);
        }

        sqlx::query("UPDATE events SET status = 'completed', updated_at = $2 WHERE id = ANY($1)")
            .bind(ids.as_slice())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        release_holds_for_events(&mut *tx, &ids).await?;

        tx.commit().await?;
        Ok(ids.len() as u64)
    }

    async fn reserve_seat(&self, hold: SeatHold, now: DateTime<Utc>) -> StoreResult<Reservation> {
        let mut tx = self.pool.begin().await?;

        // The row lock serializes reservations per event.
        let row: Option<(String, i32, i32)> = sqlx::query_as(
            "SELECT status, capacity, reserved_seats FROM events WHERE id = $1 FOR UPDATE",
        )
        .bind(hold.event_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some((status, capacity, mut reserved)) = row else {
            return Ok(Reservation::EventNotFound);
        };
        let status = parse_status(&status)?;
        if !status.accepts_registrations() {
            return Ok(Reservation::Closed(status));
        }

        let attending: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM event_attendees WHERE event_id = $1 AND user_id = $2)",
        )
        .bind(hold.event_id)
        .bind(hold.user_id)
        .fetch_one(&mut *tx)
        .await?;
        if attending {
            return Ok(Reservation::AlreadyRegistered);
        }

        let existing: Option<HoldRow> = sqlx::query_as(&format!(
            "SELECT {HOLD_COLUMNS} FROM seat_holds WHERE event_id = $1 AND user_id = $2"
        ))
        .bind(hold.event_id)
        .bind(hold.user_id)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(existing) = existing.map(SeatHold::from) {
            if !existing.is_expired(now) {
                return Ok(Reservation::Pending(existing));
            }
            sqlx::query("DELETE FROM seat_holds WHERE id = $1")
                .bind(existing.id)
                .execute(&mut *tx)
                .await?;
            reserved -= 1;
        }

        if reserved >= capacity {
            sqlx::query("UPDATE events SET reserved_seats = $2 WHERE id = $1")
                .bind(hold.event_id)
                .bind(reserved)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Ok(Reservation::Full);
        }

        sqlx::query(
            "INSERT INTO seat_holds (id, event_id, user_id, price, created_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(hold.id)
        .bind(hold.event_id)
        .bind(hold.user_id)
        .bind(hold.price)
        .bind(hold.created_at)
        .bind(hold.expires_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE events SET reserved_seats = $2 WHERE id = $1")
            .bind(hold.event_id)
            .bind(reserved + 1)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Reservation::Reserved(hold))
    }

    async fn attach_order(&self, hold_id: Uuid, order: &PaymentOrder) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE seat_holds SET order_id = $2, order_amount = $3, order_currency = $4, \
             order_receipt = $5 WHERE id = $1",
        )
        .bind(hold_id)
        .bind(&order.id)
        .bind(order.amount)
        .bind(&order.currency)
        .bind(&order.receipt)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_hold_by_order(&self, order_id: &str) -> StoreResult<Option<SeatHold>> {
        let row: Option<HoldRow> = sqlx::query_as(&format!(
            "SELECT {HOLD_COLUMNS} FROM seat_holds WHERE order_id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(SeatHold::from))
    }

    async fn release_hold(&self, hold_id: Uuid) -> StoreResult<bool> {
        let event_id: Option<Uuid> =
            sqlx::query_scalar("SELECT event_id FROM seat_holds WHERE id = $1")
                .bind(hold_id)
                .fetch_optional(&self.pool)
                .await?;
        let Some(event_id) = event_id else {
            return Ok(false);
        };

        let mut tx = self.pool.begin().await?;
        lock_event(&mut *tx, event_id).await?;

        let deleted = sqlx::query("DELETE FROM seat_holds WHERE id = $1")
            .bind(hold_id)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Ok(false);
        }
        sqlx::query("UPDATE events SET reserved_seats = reserved_seats - 1 WHERE id = $1")
            .bind(event_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn release_expired_holds(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;

        let locked: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM events WHERE id IN \
             (SELECT event_id FROM seat_holds WHERE expires_at <= $1) ORDER BY id FOR UPDATE",
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;
        if locked.is_empty() {
            return Ok(0);
        }

        let released: Vec<i32> = sqlx::query_scalar(
            "WITH expired AS (DELETE FROM seat_holds WHERE expires_at <= $1 AND event_id = ANY($2) \
             RETURNING event_id), \
             counts AS (SELECT event_id, COUNT(*)::int AS n FROM expired GROUP BY event_id) \
             UPDATE events e SET reserved_seats = e.reserved_seats - counts.n \
             FROM counts WHERE e.id = counts.event_id RETURNING counts.n",
        )
        .bind(now)
        .bind(locked.as_slice())
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(released.into_iter().map(|n| n as u64).sum())
    }

    async fn convert_hold(&self, hold_id: Uuid, ticket: &Ticket) -> StoreResult<Conversion> {
        let mut tx = self.pool.begin().await?;

        let Some(status) = lock_event(&mut *tx, ticket.event_id).await? else {
            return Err(StoreError::Missing("event"));
        };

        let consumed = sqlx::query("DELETE FROM seat_holds WHERE id = $1 AND event_id = $2")
            .bind(hold_id)
            .bind(ticket.event_id)
            .execute(&mut *tx)
            .await?;
        if consumed.rows_affected() == 0 {
            return Err(StoreError::Missing("seat hold"));
        }

        if !status.accepts_registrations() {
            sqlx::query("UPDATE events SET reserved_seats = reserved_seats - 1 WHERE id = $1")
                .bind(ticket.event_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Ok(Conversion::EventClosed(status));
        }

        sqlx::query(
            "INSERT INTO tickets (id, event_id, user_id, payment_id, ticket_number, qr_payload, \
             status, price, purchased_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(ticket.id)
        .bind(ticket.event_id)
        .bind(ticket.user_id)
        .bind(ticket.payment_id.as_deref())
        .bind(&ticket.ticket_number)
        .bind(&ticket.qr_payload)
        .bind(ticket.status.as_str())
        .bind(ticket.price)
        .bind(ticket.purchased_at)
        .execute(&mut *tx)
        .await
        .map_err(map_db_error)?;

        sqlx::query(
            "INSERT INTO event_attendees (event_id, user_id, payment_id, ticket_id, registered_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(ticket.event_id)
        .bind(ticket.user_id)
        .bind(ticket.payment_id.as_deref())
        .bind(ticket.id)
        .bind(ticket.purchased_at)
        .execute(&mut *tx)
        .await
        .map_err(map_db_error)?;

        sqlx::query(
            "UPDATE accounts SET registered_events = array_append(registered_events, $2) WHERE id = $1",
        )
        .bind(ticket.user_id)
        .bind(ticket.event_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Conversion::Issued)
    }

    async fn find_ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>> {
        let row: Option<TicketRow> = sqlx::query_as("SELECT * FROM tickets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Ticket::try_from).transpose()
    }

    async fn find_active_ticket(&self, event_id: Uuid, user_id: Uuid) -> StoreResult<Option<Ticket>> {
        let row: Option<TicketRow> = sqlx::query_as(
            "SELECT * FROM tickets WHERE event_id = $1 AND user_id = $2 AND status = 'active'",
        )
        .bind(event_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Ticket::try_from).transpose()
    }

    async fn list_tickets_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Ticket>> {
        let rows: Vec<TicketRow> =
            sqlx::query_as("SELECT * FROM tickets WHERE user_id = $1 ORDER BY purchased_at DESC")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        tickets_from_rows(rows)
    }

    async fn list_tickets_for_event(&self, event_id: Uuid) -> StoreResult<Vec<Ticket>> {
        let rows: Vec<TicketRow> =
            sqlx::query_as("SELECT * FROM tickets WHERE event_id = $1 ORDER BY purchased_at")
                .bind(event_id)
                .fetch_all(&self.pool)
                .await?;
        tickets_from_rows(rows)
    }

    async fn mark_ticket_used(&self, id: Uuid) -> StoreResult<bool> {
        let result =
            sqlx::query("UPDATE tickets SET status = 'used' WHERE id = $1 AND status = 'active'")
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cancel_ticket(&self, id: Uuid) -> StoreResult<bool> {
        let event_id: Option<Uuid> = sqlx::query_scalar("SELECT event_id FROM tickets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(event_id) = event_id else {
            return Ok(false);
        };

        let mut tx = self.pool.begin().await?;
        lock_event(&mut *tx, event_id).await?;

        let user_id: Option<Uuid> = sqlx::query_scalar(
            "UPDATE tickets SET status = 'cancelled' WHERE id = $1 AND status = 'active' \
             RETURNING user_id",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(user_id) = user_id else {
            return Ok(false);
        };

        let removed =
            sqlx::query("DELETE FROM event_attendees WHERE event_id = $1 AND user_id = $2")
                .bind(event_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        if removed.rows_affected() > 0 {
            sqlx::query("UPDATE events SET reserved_seats = reserved_seats - 1 WHERE id = $1")
                .bind(event_id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            "UPDATE accounts SET registered_events = array_remove(registered_events, $2) WHERE id = $1",
        )
        .bind(user_id)
        .bind(event_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn tickets_due_for_reminder(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Ticket>> {
        let rows: Vec<TicketRow> = sqlx::query_as(
            "SELECT t.* FROM tickets t JOIN events e ON e.id = t.event_id \
             WHERE t.status = 'active' AND t.reminder_sent_at IS NULL \
             AND e.status IN ('upcoming', 'ongoing') AND e.date >= $1 AND e.date < $2",
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        tickets_from_rows(rows)
    }

    async fn mark_reminded(&self, ticket_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE tickets SET reminder_sent_at = $2 WHERE id = $1")
            .bind(ticket_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
