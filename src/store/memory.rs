use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    Conversion, Reservation, Store, StoreError, StoreResult, EMAIL_UNIQUE, TICKET_NUMBER_UNIQUE,
};
use crate::models::{
    Account, Attendee, Event, EventFilter, EventStatus, Feedback, PaymentOrder, SeatHold, Ticket,
    TicketStatus,
};

#[derive(Default)]
struct Inner {
    accounts: HashMap<Uuid, Account>,
    events: HashMap<Uuid, Event>,
    holds: HashMap<Uuid, SeatHold>,
    tickets: HashMap<Uuid, Ticket>,
    ticket_numbers: HashSet<String>,
}

impl Inner {
    fn drop_hold(&mut self, hold_id: Uuid) -> bool {
        let Some(hold) = self.holds.remove(&hold_id) else {
            return false;
        };
        if let Some(event) = self.events.get_mut(&hold.event_id) {
            event.reserved_seats -= 1;
        }
        true
    }

    fn drop_holds_for_event(&mut self, event_id: Uuid) -> i32 {
        let before = self.holds.len();
        self.holds.retain(|_, h| h.event_id != event_id);
        let released = (before - self.holds.len()) as i32;
        if let Some(event) = self.events.get_mut(&event_id) {
            event.reserved_seats -= released;
        }
        released
    }

    fn unlink_registration(&mut self, event_id: Uuid, user_id: Uuid) {
        if let Some(event) = self.events.get_mut(&event_id) {
            let before = event.attendees.len();
            event.attendees.retain(|a| a.user_id != user_id);
            if event.attendees.len() < before {
                event.reserved_seats -= 1;
            }
        }
        if let Some(account) = self.accounts.get_mut(&user_id) {
            account.registered_events.retain(|id| *id != event_id);
        }
    }
}

/// In-process store. A single lock serializes every write, which makes each
/// compound operation atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_account(&self, account: &Account) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.accounts.values().any(|a| a.email == account.email) {
            return Err(StoreError::UniqueViolation(EMAIL_UNIQUE.to_string()));
        }
        inner.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn find_account(&self, id: Uuid) -> StoreResult<Option<Account>> {
        Ok(self.inner.read().await.accounts.get(&id).cloned())
    }

    async fn find_account_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        let inner = self.inner.read().await;
        Ok(inner.accounts.values().find(|a| a.email == email).cloned())
    }

    async fn find_account_by_reset_token(&self, token_hash: &str) -> StoreResult<Option<Account>> {
        let inner = self.inner.read().await;
        Ok(inner
            .accounts
            .values()
            .find(|a| a.reset_token_hash.as_deref() == Some(token_hash))
            .cloned())
    }

    async fn update_account(&self, account: &Account) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .accounts
            .get_mut(&account.id)
            .ok_or(StoreError::Missing("account"))?;
        stored.name = account.name.clone();
        stored.password_hash = account.password_hash.clone();
        stored.role = account.role;
        stored.reset_token_hash = account.reset_token_hash.clone();
        stored.reset_token_expires_at = account.reset_token_expires_at;
        stored.updated_at = account.updated_at;
        Ok(())
    }

    async fn insert_event(&self, event: &Event) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let organizer = inner
            .accounts
            .get_mut(&event.organizer_id)
            .ok_or(StoreError::Missing("organizer"))?;
        organizer.created_events.push(event.id);
        inner.events.insert(event.id, event.clone());
        Ok(())
    }

    async fn find_event(&self, id: Uuid) -> StoreResult<Option<Event>> {
        Ok(self.inner.read().await.events.get(&id).cloned())
    }

    async fn list_events(&self, filter: &EventFilter) -> StoreResult<Vec<Event>> {
        let inner = self.inner.read().await;
        let mut events: Vec<Event> = inner
            .events
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        events.sort_by_key(|e| e.date);
        Ok(events)
    }

    async fn update_event(&self, event: &Event) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .events
            .get(&event.id)
            .ok_or(StoreError::Missing("event"))?;
        let closing = !event.status.accepts_registrations();
        let held = if closing {
            inner.holds.values().filter(|h| h.event_id == event.id).count() as i32
        } else {
            0
        };
        if event.capacity < stored.reserved_seats - held {
            return Ok(false);
        }

        if closing {
            inner.drop_holds_for_event(event.id);
        }
        let stored = inner
            .events
            .get_mut(&event.id)
            .ok_or(StoreError::Missing("event"))?;
        stored.title = event.title.clone();
        stored.description = event.description.clone();
        stored.date = event.date;
        stored.time = event.time.clone();
        stored.location = event.location.clone();
        stored.category = event.category;
        stored.capacity = event.capacity;
        stored.ticket_price = event.ticket_price;
        stored.status = event.status;
        stored.registration_deadline = event.registration_deadline;
        stored.updated_at = event.updated_at;
        Ok(true)
    }

    async fn delete_event(&self, id: Uuid) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let Some(event) = inner.events.remove(&id) else {
            return Ok(false);
        };
        inner.holds.retain(|_, h| h.event_id != id);
        for ticket in inner.tickets.values_mut() {
            if ticket.event_id == id && ticket.is_active() {
                ticket.status = TicketStatus::Cancelled;
            }
        }
        for account in inner.accounts.values_mut() {
            account.registered_events.retain(|e| *e != id);
            account.created_events.retain(|e| *e != id);
        }
        tracing::debug!(event_id = %event.id, "Event removed from memory store");
        Ok(true)
    }

    async fn upsert_feedback(&self, event_id: Uuid, feedback: &Feedback) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let event = inner
            .events
            .get_mut(&event_id)
            .ok_or(StoreError::Missing("event"))?;
        event.feedback.retain(|f| f.user_id != feedback.user_id);
        event.feedback.push(feedback.clone());
        Ok(())
    }

    async fn complete_past_events(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let mut flipped = Vec::new();
        for event in inner.events.values_mut() {
            if event.status.accepts_registrations() && event.date < now {
                event.status = EventStatus::Completed;
                event.updated_at = now;
                flipped.push(event.id);
            }
        }
        for id in &flipped {
            inner.drop_holds_for_event(*id);
        }
        Ok(flipped.len() as u64)
    }

    async fn reserve_seat(&self, hold: SeatHold, now: DateTime<Utc>) -> StoreResult<Reservation> {
        let mut inner = self.inner.write().await;

        let Some(event) = inner.events.get(&hold.event_id) else {
            return Ok(Reservation::EventNotFound);
        };
        if !event.status.accepts_registrations() {
            return Ok(Reservation::Closed(event.status));
        }
        if event.has_attendee(hold.user_id) {
            return Ok(Reservation::AlreadyRegistered);
        }

        let existing = inner
            .holds
            .values()
            .find(|h| h.event_id == hold.event_id && h.user_id == hold.user_id)
            .cloned();
        if let Some(existing) = existing {
            if !existing.is_expired(now) {
                return Ok(Reservation::Pending(existing));
            }
            inner.drop_hold(existing.id);
        }

        let event = inner
            .events
            .get_mut(&hold.event_id)
            .ok_or(StoreError::Missing("event"))?;
        if event.reserved_seats >= event.capacity {
            return Ok(Reservation::Full);
        }
        event.reserved_seats += 1;
        inner.holds.insert(hold.id, hold.clone());
        Ok(Reservation::Reserved(hold))
    }

    async fn attach_order(&self, hold_id: Uuid, order: &PaymentOrder) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.holds.get_mut(&hold_id) {
            Some(hold) => {
                hold.order = Some(order.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_hold_by_order(&self, order_id: &str) -> StoreResult<Option<SeatHold>> {
        let inner = self.inner.read().await;
        Ok(inner
            .holds
            .values()
            .find(|h| h.order.as_ref().is_some_and(|o| o.id == order_id))
            .cloned())
    }

    async fn release_hold(&self, hold_id: Uuid) -> StoreResult<bool> {
        Ok(self.inner.write().await.drop_hold(hold_id))
    }

    async fn release_expired_holds(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let expired: Vec<Uuid> = inner
            .holds
            .values()
            .filter(|h| h.is_expired(now))
            .map(|h| h.id)
            .collect();
        for id in &expired {
            inner.drop_hold(*id);
        }
        Ok(expired.len() as u64)
    }

    async fn convert_hold(&self, hold_id: Uuid, ticket: &Ticket) -> StoreResult<Conversion> {
        let mut inner = self.inner.write().await;
        if !inner.holds.contains_key(&hold_id) {
            return Err(StoreError::Missing("seat hold"));
        }
        let status = inner
            .events
            .get(&ticket.event_id)
            .map(|e| e.status)
            .ok_or(StoreError::Missing("event"))?;
        if !status.accepts_registrations() {
            inner.drop_hold(hold_id);
            return Ok(Conversion::EventClosed(status));
        }
        if inner.ticket_numbers.contains(&ticket.ticket_number) {
            return Err(StoreError::UniqueViolation(TICKET_NUMBER_UNIQUE.to_string()));
        }
        if !inner.accounts.contains_key(&ticket.user_id) {
            return Err(StoreError::Missing("account"));
        }

        // Validated above; from here on nothing can fail.
        inner.holds.remove(&hold_id);
        if let Some(event) = inner.events.get_mut(&ticket.event_id) {
            event.attendees.push(Attendee {
                user_id: ticket.user_id,
                payment_id: ticket.payment_id.clone(),
                ticket_id: ticket.id,
                registered_at: ticket.purchased_at,
            });
        }
        if let Some(account) = inner.accounts.get_mut(&ticket.user_id) {
            account.registered_events.push(ticket.event_id);
        }
        inner.ticket_numbers.insert(ticket.ticket_number.clone());
        inner.tickets.insert(ticket.id, ticket.clone());
        Ok(Conversion::Issued)
    }

    async fn find_ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>> {
        Ok(self.inner.read().await.tickets.get(&id).cloned())
    }

    async fn find_active_ticket(&self, event_id: Uuid, user_id: Uuid) -> StoreResult<Option<Ticket>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tickets
            .values()
            .find(|t| t.event_id == event_id && t.user_id == user_id && t.is_active())
            .cloned())
    }

    async fn list_tickets_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Ticket>> {
        let inner = self.inner.read().await;
        let mut tickets: Vec<Ticket> = inner
            .tickets
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        tickets.sort_by(|a, b| b.purchased_at.cmp(&a.purchased_at));
        Ok(tickets)
    }

    async fn list_tickets_for_event(&self, event_id: Uuid) -> StoreResult<Vec<Ticket>> {
        let inner = self.inner.read().await;
        let mut tickets: Vec<Ticket> = inner
            .tickets
            .values()
            .filter(|t| t.event_id == event_id)
            .cloned()
            .collect();
        tickets.sort_by_key(|t| t.purchased_at);
        Ok(tickets)
    }

    async fn mark_ticket_used(&self, id: Uuid) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.tickets.get_mut(&id) {
            Some(ticket) if ticket.is_active() => {
                ticket.status = TicketStatus::Used;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel_ticket(&self, id: Uuid) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let (event_id, user_id) = match inner.tickets.get_mut(&id) {
            Some(ticket) if ticket.is_active() => {
                ticket.status = TicketStatus::Cancelled;
                (ticket.event_id, ticket.user_id)
            }
            _ => return Ok(false),
        };
        inner.unlink_registration(event_id, user_id);
        Ok(true)
    }

    async fn tickets_due_for_reminder(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Ticket>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tickets
            .values()
            .filter(|t| t.is_active() && t.reminder_sent_at.is_none())
            .filter(|t| {
                inner
                    .events
                    .get(&t.event_id)
                    .is_some_and(|e| {
                        e.status.accepts_registrations() && e.date >= from && e.date < to
                    })
            })
            .cloned()
            .collect())
    }

    async fn mark_reminded(&self, ticket_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let ticket = inner
            .tickets
            .get_mut(&ticket_id)
            .ok_or(StoreError::Missing("ticket"))?;
        ticket.reminder_sent_at = Some(at);
        Ok(())
    }
}
