use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::policy::{self, Capability};
use crate::models::{Account, Event, Ticket, TicketStatus};
use crate::store::{Conversion, Store, StoreError, TICKET_NUMBER_UNIQUE};
use crate::utils::error::{AppError, AppResult};

const NUMBER_ATTEMPTS: usize = 5;
const SUFFIX_LEN: usize = 8;
const SUFFIX_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// The hold a ticket is issued against, plus what the ticket records.
#[derive(Debug, Clone)]
pub struct SeatClaim {
    pub hold_id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub price: Decimal,
    pub payment_id: Option<String>,
}

pub struct TicketLedger {
    store: Arc<dyn Store>,
}

impl TicketLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Converts the claimed hold into an active ticket. Number clashes are
    /// retried with a fresh number. An event that closed while the seat was
    /// held gets its seat back and no ticket.
    pub async fn issue(&self, claim: SeatClaim) -> AppResult<Ticket> {
        for attempt in 1..=NUMBER_ATTEMPTS {
            let ticket_number = generate_ticket_number();
            let ticket = Ticket {
                id: Uuid::new_v4(),
                event_id: claim.event_id,
                user_id: claim.user_id,
                payment_id: claim.payment_id.clone(),
                qr_payload: qr_payload(&ticket_number, claim.event_id, claim.user_id),
                ticket_number,
                status: TicketStatus::Active,
                price: claim.price,
                purchased_at: Utc::now(),
                reminder_sent_at: None,
            };

            match self.store.convert_hold(claim.hold_id, &ticket).await {
                Ok(Conversion::Issued) => {
                    info!(
                        ticket_number = %ticket.ticket_number,
                        event_id = %ticket.event_id,
                        user_id = %ticket.user_id,
                        "Ticket issued"
                    );
                    return Ok(ticket);
                }
                Ok(Conversion::EventClosed(status)) => {
                    warn!(event_id = %claim.event_id, hold_id = %claim.hold_id, %status, "Event closed before the hold was converted");
                    return Err(AppError::EventClosed(status.to_string()));
                }
                Err(e) if e.is_unique_violation(TICKET_NUMBER_UNIQUE) => {
                    warn!(attempt, ticket_number = %ticket.ticket_number, "Ticket number clash, regenerating");
                }
                // The hold expired and was swept before conversion.
                Err(StoreError::Missing("seat hold")) => return Err(AppError::PaymentExpired),
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::InternalServerError(
            "Could not allocate a unique ticket number".to_string(),
        ))
    }

    pub async fn find(&self, ticket_id: Uuid) -> AppResult<Ticket> {
        self.store
            .find_ticket(ticket_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Ticket not found".to_string()))
    }

    /// A ticket is visible to its holder and to whoever manages its event.
    pub async fn find_for(&self, requester: &Account, ticket_id: Uuid) -> AppResult<Ticket> {
        let ticket = self.find(ticket_id).await?;
        if ticket.user_id == requester.id {
            return Ok(ticket);
        }

        match self.store.find_event(ticket.event_id).await? {
            Some(event) if policy::can_manage_event(requester, &event) => Ok(ticket),
            _ => Err(AppError::Forbidden(
                "You do not have access to this ticket".to_string(),
            )),
        }
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> AppResult<Vec<Ticket>> {
        Ok(self.store.list_tickets_for_user(user_id).await?)
    }

    pub async fn list_upcoming_for_user(&self, user_id: Uuid) -> AppResult<Vec<Ticket>> {
        let (upcoming, _) = self.split_by_event_date(user_id).await?;
        Ok(upcoming)
    }

    pub async fn list_past_for_user(&self, user_id: Uuid) -> AppResult<Vec<Ticket>> {
        let (_, past) = self.split_by_event_date(user_id).await?;
        Ok(past)
    }

    /// Tickets whose event has been deleted count as past.
    async fn split_by_event_date(&self, user_id: Uuid) -> AppResult<(Vec<Ticket>, Vec<Ticket>)> {
        let tickets = self.store.list_tickets_for_user(user_id).await?;
        let mut dates = HashMap::new();
        for ticket in &tickets {
            if !dates.contains_key(&ticket.event_id) {
                let date = self.store.find_event(ticket.event_id).await?.map(|e| e.date);
                dates.insert(ticket.event_id, date);
            }
        }

        let now = Utc::now();
        Ok(tickets.into_iter().partition(|ticket| {
            matches!(dates.get(&ticket.event_id), Some(Some(date)) if *date >= now)
        }))
    }

    pub async fn list_for_event(&self, requester: &Account, event_id: Uuid) -> AppResult<Vec<Ticket>> {
        let event = self.load_event(event_id).await?;
        policy::require_event_manager(
            requester,
            &event,
            Capability::ViewEventTickets,
            "view this event's tickets",
        )?;
        Ok(self.store.list_tickets_for_event(event_id).await?)
    }

    /// Checks a ticket in at the door.
    pub async fn mark_used(&self, requester: &Account, ticket_id: Uuid) -> AppResult<Ticket> {
        let ticket = self.find(ticket_id).await?;
        let event = self.load_event(ticket.event_id).await?;
        policy::require_event_manager(requester, &event, Capability::CheckInTickets, "check in tickets")?;

        if !ticket.is_active() {
            return Err(AppError::InvalidTicketState(ticket.status.to_string()));
        }
        if !self.store.mark_ticket_used(ticket_id).await? {
            return Err(self.stale_state(ticket_id).await);
        }

        info!(ticket_number = %ticket.ticket_number, by = %requester.id, "Ticket checked in");
        self.find(ticket_id).await
    }

    /// Cancels an active ticket and frees its seat.
    pub async fn cancel(&self, requester: &Account, ticket_id: Uuid) -> AppResult<Ticket> {
        let ticket = self.find(ticket_id).await?;
        if ticket.user_id != requester.id {
            let allowed = match self.store.find_event(ticket.event_id).await? {
                Some(event) => policy::can_manage_event(requester, &event),
                None => policy::allows(requester.role, Capability::ManageAnyEvent),
            };
            if !allowed {
                return Err(AppError::Forbidden(
                    "Only the ticket holder, the event organizer or an admin can cancel this ticket"
                        .to_string(),
                ));
            }
        }

        if !ticket.is_active() {
            return Err(AppError::InvalidTicketState(ticket.status.to_string()));
        }
        if !self.store.cancel_ticket(ticket_id).await? {
            return Err(self.stale_state(ticket_id).await);
        }

        info!(ticket_number = %ticket.ticket_number, by = %requester.id, "Ticket cancelled");
        self.find(ticket_id).await
    }

    async fn load_event(&self, event_id: Uuid) -> AppResult<Event> {
        self.store
            .find_event(event_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Event not found".to_string()))
    }

    /// The ticket changed state between the read and the conditional write.
    async fn stale_state(&self, ticket_id: Uuid) -> AppError {
        match self.find(ticket_id).await {
            Ok(current) => AppError::InvalidTicketState(current.status.to_string()),
            Err(e) => e,
        }
    }
}

pub fn generate_ticket_number() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| SUFFIX_CHARSET[rng.gen_range(0..SUFFIX_CHARSET.len())] as char)
        .collect();
    format!("TKT-{}-{}", to_base36(millis), suffix)
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn qr_payload(ticket_number: &str, event_id: Uuid, user_id: Uuid) -> String {
    json!({
        "ticketNumber": ticket_number,
        "eventId": event_id,
        "userId": user_id,
    })
    .to_string()
}
