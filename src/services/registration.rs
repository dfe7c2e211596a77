//! Turning a registration request into a ticket, directly for free events
//! and through a payment order for paid ones.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::{Account, Event, PaymentOrder, SeatHold, Ticket};
use crate::services::notify::NotificationDispatcher;
use crate::services::payment::PaymentGateway;
use crate::services::tickets::{SeatClaim, TicketLedger};
use crate::store::{Reservation, Store};
use crate::utils::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSummary {
    pub id: Uuid,
    pub title: String,
    pub price: Decimal,
}

#[derive(Debug, Clone)]
pub enum RegistrationResult {
    Ticketed(Ticket),
    PaymentRequired {
        order: PaymentOrder,
        event: EventSummary,
    },
}

#[derive(Debug, Clone)]
pub struct PaymentConfirmation {
    pub order_id: String,
    pub payment_id: String,
    pub signature: String,
}

pub struct RegistrationService {
    store: Arc<dyn Store>,
    tickets: Arc<TicketLedger>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: NotificationDispatcher,
    currency: String,
    hold_ttl: Duration,
}

impl RegistrationService {
    pub fn new(
        store: Arc<dyn Store>,
        tickets: Arc<TicketLedger>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: NotificationDispatcher,
        currency: impl Into<String>,
        hold_ttl: Duration,
    ) -> Self {
        Self {
            store,
            tickets,
            gateway,
            notifier,
            currency: currency.into(),
            hold_ttl,
        }
    }

    pub async fn register(&self, event_id: Uuid, user_id: Uuid) -> AppResult<RegistrationResult> {
        let event = self.load_event(event_id).await?;
        let user = self.load_user(user_id).await?;

        if !event.status.accepts_registrations() {
            return Err(AppError::EventClosed(event.status.to_string()));
        }
        let now = Utc::now();
        if now > event.registration_deadline {
            return Err(AppError::RegistrationClosed);
        }
        if self.store.find_active_ticket(event.id, user.id).await?.is_some() {
            return Err(AppError::AlreadyRegistered);
        }

        let hold = SeatHold::new(event.id, user.id, event.ticket_price, self.hold_ttl);
        let hold = match self.store.reserve_seat(hold, now).await? {
            Reservation::Reserved(hold) => hold,
            Reservation::Pending(existing) => {
                return match existing.order {
                    // Same order again so a client retry does not double-book.
                    Some(order) => Ok(RegistrationResult::PaymentRequired {
                        order,
                        event: summary(&event, existing.price),
                    }),
                    None => Err(AppError::AlreadyRegistered),
                };
            }
            Reservation::AlreadyRegistered => return Err(AppError::AlreadyRegistered),
            Reservation::Full => return Err(AppError::EventFull),
            Reservation::Closed(status) => return Err(AppError::EventClosed(status.to_string())),
            Reservation::EventNotFound => {
                return Err(AppError::NotFound("Event not found".to_string()))
            }
        };

        if hold.price.is_zero() {
            let ticket = self.finish(&hold, &user, &event, None).await?;
            Ok(RegistrationResult::Ticketed(ticket))
        } else {
            self.open_order(hold, &event).await
        }
    }

    pub async fn confirm_payment(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        confirmation: PaymentConfirmation,
    ) -> AppResult<Ticket> {
        let PaymentConfirmation {
            order_id,
            payment_id,
            signature,
        } = confirmation;

        let hold = match self.store.find_hold_by_order(&order_id).await? {
            Some(hold) if hold.event_id == event_id && hold.user_id == user_id => hold,
            Some(_) => return Err(AppError::NotFound("Payment order not found".to_string())),
            None => {
                if let Some(ticket) = self.already_confirmed(event_id, user_id, &payment_id).await? {
                    return Ok(ticket);
                }
                // Closing an event releases its holds.
                return match self.store.find_event(event_id).await? {
                    Some(event) if !event.status.accepts_registrations() => {
                        Err(AppError::EventClosed(event.status.to_string()))
                    }
                    _ => Err(AppError::NotFound("Payment order not found".to_string())),
                };
            }
        };

        if hold.is_expired(Utc::now()) {
            self.release(&hold).await;
            return Err(AppError::PaymentExpired);
        }

        // Gateway errors keep the hold so the client can retry.
        if !self
            .gateway
            .confirm_payment(&order_id, &payment_id, &signature)
            .await?
        {
            warn!(order_id = %order_id, user_id = %user_id, "Payment signature mismatch, releasing seat");
            self.release(&hold).await;
            return Err(AppError::InvalidSignature);
        }

        let (event, user) = match (self.load_event(event_id).await, self.load_user(user_id).await) {
            (Ok(event), Ok(user)) => (event, user),
            (Err(e), _) | (_, Err(e)) => {
                self.release(&hold).await;
                return Err(e);
            }
        };

        match self.finish(&hold, &user, &event, Some(payment_id.clone())).await {
            // A concurrent confirmation converted the hold first.
            Err(AppError::PaymentExpired) => self
                .already_confirmed(event_id, user_id, &payment_id)
                .await?
                .ok_or(AppError::PaymentExpired),
            other => other,
        }
    }

    async fn open_order(&self, hold: SeatHold, event: &Event) -> AppResult<RegistrationResult> {
        let receipt = format!("rcpt_{}", hold.id.simple());

        let order = match self
            .gateway
            .create_order(hold.price, &self.currency, &receipt)
            .await
        {
            Ok(order) => order,
            Err(e) => {
                self.release(&hold).await;
                return Err(e);
            }
        };

        match self.store.attach_order(hold.id, &order).await {
            Ok(true) => {}
            Ok(false) => return Err(AppError::PaymentExpired),
            Err(e) => {
                self.release(&hold).await;
                return Err(e.into());
            }
        }

        info!(
            order_id = %order.id,
            event_id = %event.id,
            user_id = %hold.user_id,
            expires_at = %hold.expires_at,
            "Payment order created, seat held"
        );
        Ok(RegistrationResult::PaymentRequired {
            order,
            event: summary(event, hold.price),
        })
    }

    async fn finish(
        &self,
        hold: &SeatHold,
        user: &Account,
        event: &Event,
        payment_id: Option<String>,
    ) -> AppResult<Ticket> {
        let claim = SeatClaim {
            hold_id: hold.id,
            event_id: event.id,
            user_id: user.id,
            price: hold.price,
            payment_id,
        };

        match self.tickets.issue(claim).await {
            Ok(ticket) => {
                self.notifier
                    .dispatch_ticket(user.email.clone(), ticket.clone(), event.clone());
                Ok(ticket)
            }
            Err(e) => {
                self.release(hold).await;
                Err(e)
            }
        }
    }

    async fn already_confirmed(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        payment_id: &str,
    ) -> AppResult<Option<Ticket>> {
        Ok(self
            .store
            .find_active_ticket(event_id, user_id)
            .await?
            .filter(|ticket| ticket.payment_id.as_deref() == Some(payment_id)))
    }

    async fn release(&self, hold: &SeatHold) {
        match self.store.release_hold(hold.id).await {
            Ok(true) => info!(hold_id = %hold.id, event_id = %hold.event_id, "Seat hold released"),
            Ok(false) => {}
            // The expiry sweep will reclaim it.
            Err(e) => error!(hold_id = %hold.id, error = ?e, "Failed to release seat hold"),
        }
    }

    async fn load_event(&self, event_id: Uuid) -> AppResult<Event> {
        self.store
            .find_event(event_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Event not found".to_string()))
    }

    async fn load_user(&self, user_id: Uuid) -> AppResult<Account> {
        self.store
            .find_account(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }
}

fn summary(event: &Event, price: Decimal) -> EventSummary {
    EventSummary {
        id: event.id,
        title: event.title.clone(),
        price,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventCategory, EventPatch, EventStatus, NewEvent, Role, TicketStatus};
    use crate::test_helpers::{test_context, TestContext};
    use std::str::FromStr;

    async fn account(ctx: &TestContext, role: Role) -> Account {
        let account = Account::new(
            "Someone".into(),
            format!("{}@example.com", Uuid::new_v4()),
            "hash".into(),
            role,
        );
        ctx.store.insert_account(&account).await.unwrap();
        account
    }

    async fn event(ctx: &TestContext, capacity: i32, price: &str) -> Event {
        let organizer = account(ctx, Role::Organizer).await;
        ctx.state
            .catalog
            .create(
                organizer.id,
                NewEvent {
                    title: "Launch Party".into(),
                    description: String::new(),
                    date: Utc::now() + Duration::days(7),
                    time: "19:00".into(),
                    location: "Atrium".into(),
                    category: EventCategory::Social,
                    capacity,
                    ticket_price: Decimal::from_str(price).unwrap(),
                    registration_deadline: None,
                },
            )
            .await
            .unwrap()
    }

    fn confirmation(ctx: &TestContext, order_id: &str, payment_id: &str) -> PaymentConfirmation {
        PaymentConfirmation {
            order_id: order_id.to_string(),
            payment_id: payment_id.to_string(),
            signature: ctx.gateway.sign(order_id, payment_id),
        }
    }

    async fn pay(ctx: &TestContext, event: &Event, user: &Account) -> PaymentOrder {
        match ctx.state.registrations.register(event.id, user.id).await.unwrap() {
            RegistrationResult::PaymentRequired { order, .. } => order,
            other => panic!("expected an order, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_free_registration_issues_ticket_and_mails() {
        let ctx = test_context();
        let event = event(&ctx, 10, "0").await;
        let student = account(&ctx, Role::Student).await;

        let result = ctx.state.registrations.register(event.id, student.id).await.unwrap();
        let RegistrationResult::Ticketed(ticket) = result else {
            panic!("free events issue tickets directly");
        };
        assert_eq!(ticket.status, TicketStatus::Active);
        assert!(ticket.payment_id.is_none());

        let stored = ctx.store.find_event(event.id).await.unwrap().unwrap();
        assert!(stored.has_attendee(student.id));
        assert_eq!(stored.reserved_seats, 1);

        let mails = ctx.mailer.wait_for(1).await;
        assert_eq!(mails[0].to, student.email);
        assert!(mails[0].body.contains(&ticket.ticket_number));

        assert!(matches!(
            ctx.state.registrations.register(event.id, student.id).await,
            Err(AppError::AlreadyRegistered)
        ));
    }

    #[tokio::test]
    async fn test_paid_registration_holds_seat_until_confirmed() {
        let ctx = test_context();
        let event = event(&ctx, 1, "250.00").await;
        let student = account(&ctx, Role::Student).await;
        let other = account(&ctx, Role::Student).await;

        let order = pay(&ctx, &event, &student).await;
        assert_eq!(order.amount, 25000);

        // The held seat counts against capacity.
        assert!(matches!(
            ctx.state.registrations.register(event.id, other.id).await,
            Err(AppError::EventFull)
        ));

        // Retrying returns the same order.
        let again = pay(&ctx, &event, &student).await;
        assert_eq!(again.id, order.id);
        assert_eq!(ctx.gateway.orders_created(), 1);

        let ticket = ctx
            .state
            .registrations
            .confirm_payment(event.id, student.id, confirmation(&ctx, &order.id, "pay_1"))
            .await
            .unwrap();
        assert_eq!(ticket.payment_id.as_deref(), Some("pay_1"));
        assert_eq!(ticket.price, Decimal::from_str("250.00").unwrap());

        let replay = ctx
            .state
            .registrations
            .confirm_payment(event.id, student.id, confirmation(&ctx, &order.id, "pay_1"))
            .await
            .unwrap();
        assert_eq!(replay.id, ticket.id);
    }

    #[tokio::test]
    async fn test_bad_signature_releases_seat() {
        let ctx = test_context();
        let event = event(&ctx, 1, "99").await;
        let student = account(&ctx, Role::Student).await;
        let order = pay(&ctx, &event, &student).await;

        let forged = PaymentConfirmation {
            order_id: order.id.clone(),
            payment_id: "pay_x".into(),
            signature: "00".repeat(32),
        };
        assert!(matches!(
            ctx.state.registrations.confirm_payment(event.id, student.id, forged).await,
            Err(AppError::InvalidSignature)
        ));

        let stored = ctx.store.find_event(event.id).await.unwrap().unwrap();
        assert_eq!(stored.reserved_seats, 0);
        assert!(ctx.store.find_active_ticket(event.id, student.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_gateway_failure_releases_seat() {
        let ctx = test_context();
        let event = event(&ctx, 1, "10").await;
        let student = account(&ctx, Role::Student).await;
        ctx.gateway.set_failing(true);

        assert!(matches!(
            ctx.state.registrations.register(event.id, student.id).await,
            Err(AppError::PaymentGatewayError(_))
        ));
        let stored = ctx.store.find_event(event.id).await.unwrap().unwrap();
        assert_eq!(stored.reserved_seats, 0);
    }

    #[tokio::test]
    async fn test_swept_hold_cannot_be_confirmed() {
        let ctx = test_context();
        let event = event(&ctx, 3, "10").await;
        let student = account(&ctx, Role::Student).await;
        let order = pay(&ctx, &event, &student).await;

        // Simulate the window lapsing.
        ctx.store
            .release_expired_holds(Utc::now() + Duration::hours(1))
            .await
            .unwrap();

        let result = ctx
            .state
            .registrations
            .confirm_payment(event.id, student.id, confirmation(&ctx, &order.id, "pay_late"))
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_lapsed_hold_is_payment_expired() {
        let mut config = crate::config::Config::default();
        config.payment.hold_ttl = Duration::seconds(-1);
        let ctx = crate::test_helpers::test_context_with(config);
        let event = event(&ctx, 3, "10").await;
        let student = account(&ctx, Role::Student).await;
        let order = pay(&ctx, &event, &student).await;

        let result = ctx
            .state
            .registrations
            .confirm_payment(event.id, student.id, confirmation(&ctx, &order.id, "pay_late"))
            .await;
        assert!(matches!(result, Err(AppError::PaymentExpired)));

        let stored = ctx.store.find_event(event.id).await.unwrap().unwrap();
        assert_eq!(stored.reserved_seats, 0);
    }

    #[tokio::test]
    async fn test_confirm_for_someone_elses_order_is_not_found() {
        let ctx = test_context();
        let event = event(&ctx, 3, "10").await;
        let student = account(&ctx, Role::Student).await;
        let intruder = account(&ctx, Role::Student).await;
        let order = pay(&ctx, &event, &student).await;

        let result = ctx
            .state
            .registrations
            .confirm_payment(event.id, intruder.id, confirmation(&ctx, &order.id, "pay_1"))
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cancelled_event_rejects_registration() {
        let ctx = test_context();
        let event = event(&ctx, 3, "0").await;
        let student = account(&ctx, Role::Student).await;

        let mut closed = event.clone();
        closed.status = EventStatus::Cancelled;
        ctx.store.update_event(&closed).await.unwrap();

        assert!(matches!(
            ctx.state.registrations.register(event.id, student.id).await,
            Err(AppError::EventClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_cancelling_event_voids_open_payment() {
        let ctx = test_context();
        let event = event(&ctx, 2, "40").await;
        let student = account(&ctx, Role::Student).await;
        let order = pay(&ctx, &event, &student).await;

        let patch = EventPatch {
            status: Some(EventStatus::Cancelled),
            ..Default::default()
        };
        let cancelled = ctx.state.catalog.update(event.id, event.organizer_id, patch).await.unwrap();
        assert_eq!(cancelled.status, EventStatus::Cancelled);
        assert_eq!(cancelled.reserved_seats, 0);

        let result = ctx
            .state
            .registrations
            .confirm_payment(event.id, student.id, confirmation(&ctx, &order.id, "pay_1"))
            .await;
        assert!(matches!(result, Err(AppError::EventClosed(_))));

        let stored = ctx.store.find_event(event.id).await.unwrap().unwrap();
        assert!(stored.attendees.is_empty());
        assert!(ctx.store.find_active_ticket(event.id, student.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_completed_event_voids_open_payment() {
        let ctx = test_context();
        let event = event(&ctx, 2, "40").await;
        let student = account(&ctx, Role::Student).await;
        let order = pay(&ctx, &event, &student).await;

        let flipped = ctx
            .store
            .complete_past_events(event.date + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(flipped, 1);

        let result = ctx
            .state
            .registrations
            .confirm_payment(event.id, student.id, confirmation(&ctx, &order.id, "pay_1"))
            .await;
        assert!(matches!(result, Err(AppError::EventClosed(_))));

        let stored = ctx.store.find_event(event.id).await.unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Completed);
        assert!(stored.attendees.is_empty());
        assert_eq!(stored.reserved_seats, 0);
    }
}
