use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::auth::policy::{self, Capability};
use crate::models::{
    default_registration_deadline, Account, Event, EventFilter, EventPatch, EventStatus, Feedback,
    NewEvent, NewFeedback, TicketStatus,
};
use crate::store::Store;
use crate::utils::error::{AppError, AppResult};

/// Prices are stored with cents.
const PRICE_SCALE: u32 = 2;

pub struct CatalogService {
    store: Arc<dyn Store>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create(&self, organizer_id: Uuid, fields: NewEvent) -> AppResult<Event> {
        fields.validate()?;
        let organizer = self.load_account(organizer_id).await?;
        policy::require(&organizer, Capability::CreateEvents)?;

        let registration_deadline = fields
            .registration_deadline
            .unwrap_or_else(|| default_registration_deadline(fields.date));

        let now = Utc::now();
        let event = Event {
            id: Uuid::new_v4(),
            title: fields.title.trim().to_string(),
            description: fields.description,
            date: fields.date,
            time: fields.time,
            location: fields.location.trim().to_string(),
            category: fields.category,
            capacity: fields.capacity,
            ticket_price: fields.ticket_price,
            organizer_id: organizer.id,
            attendees: Vec::new(),
            feedback: Vec::new(),
            status: EventStatus::Upcoming,
            registration_deadline,
            reserved_seats: 0,
            created_at: now,
            updated_at: now,
        };
        validate_event(&event)?;

        self.store.insert_event(&event).await?;
        info!(event_id = %event.id, organizer_id = %organizer.id, title = %event.title, "Event created");
        Ok(event)
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Event> {
        self.store
            .find_event(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Event not found".to_string()))
    }

    pub async fn list(&self, filter: &EventFilter) -> AppResult<Vec<Event>> {
        Ok(self.store.list_events(filter).await?)
    }

    pub async fn update(&self, id: Uuid, requester_id: Uuid, patch: EventPatch) -> AppResult<Event> {
        patch.validate()?;
        let requester = self.load_account(requester_id).await?;
        let mut event = self.get(id).await?;
        if !policy::can_manage_event(&requester, &event) {
            return Err(AppError::Forbidden(
                "Only the event organizer or an admin can update this event".to_string(),
            ));
        }

        let date_changed = patch.date.is_some();
        if let Some(title) = patch.title {
            event.title = title.trim().to_string();
        }
        if let Some(description) = patch.description {
            event.description = description;
        }
        if let Some(date) = patch.date {
            event.date = date;
        }
        if let Some(time) = patch.time {
            event.time = time;
        }
        if let Some(location) = patch.location {
            event.location = location.trim().to_string();
        }
        if let Some(category) = patch.category {
            event.category = category;
        }
        if let Some(capacity) = patch.capacity {
            event.capacity = capacity;
        }
        if let Some(price) = patch.ticket_price {
            event.ticket_price = price;
        }
        if let Some(status) = patch.status {
            event.status = status;
        }
        match patch.registration_deadline {
            Some(deadline) => event.registration_deadline = deadline,
            // Moving the date drags a default deadline along with it.
            None if date_changed && event.registration_deadline > event.date => {
                event.registration_deadline = default_registration_deadline(event.date);
            }
            None => {}
        }
        event.updated_at = Utc::now();
        validate_event(&event)?;

        if !self.store.update_event(&event).await? {
            return Err(AppError::ValidationError(format!(
                "Capacity cannot be lower than the {} seats already taken",
                event.reserved_seats
            )));
        }

        info!(event_id = %event.id, by = %requester.id, "Event updated");
        self.get(id).await
    }

    pub async fn delete(&self, id: Uuid, requester_id: Uuid) -> AppResult<()> {
        let requester = self.load_account(requester_id).await?;
        let event = self.get(id).await?;
        if !policy::can_manage_event(&requester, &event) {
            return Err(AppError::Forbidden(
                "Only the event organizer or an admin can delete this event".to_string(),
            ));
        }

        if !self.store.delete_event(id).await? {
            return Err(AppError::NotFound("Event not found".to_string()));
        }
        info!(event_id = %id, by = %requester.id, attendees = event.attendees.len(), "Event deleted");
        Ok(())
    }

    pub async fn submit_feedback(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        input: NewFeedback,
    ) -> AppResult<Event> {
        input.validate()?;
        let comment = input
            .comment
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        self.get(event_id).await?;
        let attended = self
            .store
            .list_tickets_for_user(user_id)
            .await?
            .iter()
            .any(|t| t.event_id == event_id && t.status != TicketStatus::Cancelled);
        if !attended {
            return Err(AppError::Forbidden(
                "Only ticket holders can leave feedback".to_string(),
            ));
        }

        let feedback = Feedback {
            user_id,
            rating: input.rating,
            comment,
            created_at: Utc::now(),
        };
        self.store.upsert_feedback(event_id, &feedback).await?;
        self.get(event_id).await
    }

    pub async fn complete_past_events(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let flipped = self.store.complete_past_events(now).await?;
        if flipped > 0 {
            info!(count = flipped, "Past events marked completed");
        }
        Ok(flipped)
    }

    async fn load_account(&self, id: Uuid) -> AppResult<Account> {
        self.store
            .find_account(id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }
}

/// Rules that span fields or that `Validate` cannot express on a `Decimal`.
fn validate_event(event: &Event) -> AppResult<()> {
    if event.ticket_price < Decimal::ZERO {
        return Err(AppError::ValidationError(
            "Ticket price cannot be negative".to_string(),
        ));
    }
    if event.ticket_price.normalize().scale() > PRICE_SCALE {
        return Err(AppError::ValidationError(
            "Ticket price cannot have more than two decimal places".to_string(),
        ));
    }
    if event.registration_deadline > event.date {
        return Err(AppError::ValidationError(
            "Registration deadline must not be after the event date".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventCategory, Role};
    use crate::store::MemoryStore;
    use chrono::Duration;

    fn new_event(capacity: i32) -> NewEvent {
        NewEvent {
            title: "  Robotics Expo ".into(),
            description: "Bots".into(),
            date: Utc::now() + Duration::days(14),
            time: "10:00".into(),
            location: "Main Hall".into(),
            category: EventCategory::Technical,
            capacity,
            ticket_price: Decimal::ZERO,
            registration_deadline: None,
        }
    }

    async fn setup() -> (CatalogService, Arc<MemoryStore>, Account, Account) {
        let store = Arc::new(MemoryStore::new());
        let organizer = Account::new("Org".into(), "org@example.com".into(), "h".into(), Role::Organizer);
        let student = Account::new("Stu".into(), "stu@example.com".into(), "h".into(), Role::Student);
        store.insert_account(&organizer).await.unwrap();
        store.insert_account(&student).await.unwrap();
        (CatalogService::new(store.clone()), store, organizer, student)
    }

    #[tokio::test]
    async fn test_create_defaults_deadline_and_links_organizer() {
        let (catalog, store, organizer, _) = setup().await;
        let fields = new_event(50);
        let date = fields.date;

        let event = catalog.create(organizer.id, fields).await.unwrap();
        assert_eq!(event.title, "Robotics Expo");
        assert_eq!(event.registration_deadline, date - Duration::days(1));

        let organizer = store.find_account(organizer.id).await.unwrap().unwrap();
        assert_eq!(organizer.created_events, vec![event.id]);
    }

    #[tokio::test]
    async fn test_students_cannot_create() {
        let (catalog, _, _, student) = setup().await;
        let err = catalog.create(student.id, new_event(10)).await.unwrap_err();
        assert!(matches!(err, AppError::RoleRequired { required: Role::Organizer, current: Role::Student }));
    }

    #[tokio::test]
    async fn test_create_rejects_bad_fields() {
        let (catalog, _, organizer, _) = setup().await;
        assert!(matches!(
            catalog.create(organizer.id, new_event(0)).await,
            Err(AppError::ValidationError(_))
        ));

        let mut priced = new_event(5);
        priced.ticket_price = Decimal::new(-1, 0);
        assert!(matches!(
            catalog.create(organizer.id, priced).await,
            Err(AppError::ValidationError(_))
        ));

        let mut blank = new_event(5);
        blank.title = "   ".into();
        assert!(matches!(
            catalog.create(organizer.id, blank).await,
            Err(AppError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_prices_are_whole_cents() {
        let (catalog, _, organizer, _) = setup().await;

        let mut sub_cent = new_event(5);
        sub_cent.ticket_price = Decimal::new(1, 3);
        assert!(matches!(
            catalog.create(organizer.id, sub_cent).await,
            Err(AppError::ValidationError(_))
        ));

        // Trailing zeros are only formatting.
        let mut padded = new_event(5);
        padded.ticket_price = Decimal::new(12_500, 3);
        let event = catalog.create(organizer.id, padded).await.unwrap();

        let patch = EventPatch {
            ticket_price: Some(Decimal::new(9_999, 3)),
            ..Default::default()
        };
        assert!(matches!(
            catalog.update(event.id, organizer.id, patch).await,
            Err(AppError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_patch_cannot_zero_capacity() {
        let (catalog, _, organizer, _) = setup().await;
        let event = catalog.create(organizer.id, new_event(5)).await.unwrap();
        let patch = EventPatch {
            capacity: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            catalog.update(event.id, organizer.id, patch).await,
            Err(AppError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_only_owner_updates() {
        let (catalog, _, organizer, student) = setup().await;
        let event = catalog.create(organizer.id, new_event(5)).await.unwrap();

        let patch = EventPatch {
            capacity: Some(8),
            ..Default::default()
        };
        assert!(matches!(
            catalog.update(event.id, student.id, patch.clone()).await,
            Err(AppError::Forbidden(_))
        ));

        let updated = catalog.update(event.id, organizer.id, patch).await.unwrap();
        assert_eq!(updated.capacity, 8);
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let (catalog, _, _, _) = setup().await;
        assert!(matches!(catalog.get(Uuid::new_v4()).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_unlinks_organizer() {
        let (catalog, store, organizer, _) = setup().await;
        let event = catalog.create(organizer.id, new_event(5)).await.unwrap();

        catalog.delete(event.id, organizer.id).await.unwrap();
        assert!(store.find_event(event.id).await.unwrap().is_none());
        let organizer = store.find_account(organizer.id).await.unwrap().unwrap();
        assert!(organizer.created_events.is_empty());
    }

    #[tokio::test]
    async fn test_feedback_requires_a_ticket() {
        let (catalog, _, organizer, student) = setup().await;
        let event = catalog.create(organizer.id, new_event(5)).await.unwrap();

        let rating = |rating| NewFeedback {
            rating,
            comment: None,
        };
        assert!(matches!(
            catalog.submit_feedback(event.id, student.id, rating(6)).await,
            Err(AppError::ValidationError(_))
        ));
        assert!(matches!(
            catalog.submit_feedback(event.id, student.id, rating(4)).await,
            Err(AppError::Forbidden(_))
        ));
    }
}
