use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::utils::validation::not_blank;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Academic,
    Cultural,
    Sports,
    Technical,
    Workshop,
    Social,
    Other,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Academic => "academic",
            EventCategory::Cultural => "cultural",
            EventCategory::Sports => "sports",
            EventCategory::Technical => "technical",
            EventCategory::Workshop => "workshop",
            EventCategory::Social => "social",
            EventCategory::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "academic" => Some(EventCategory::Academic),
            "cultural" => Some(EventCategory::Cultural),
            "sports" => Some(EventCategory::Sports),
            "technical" => Some(EventCategory::Technical),
            "workshop" => Some(EventCategory::Workshop),
            "social" => Some(EventCategory::Social),
            "other" => Some(EventCategory::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Upcoming,
    Ongoing,
    Completed,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Upcoming => "upcoming",
            EventStatus::Ongoing => "ongoing",
            EventStatus::Completed => "completed",
            EventStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "upcoming" => Some(EventStatus::Upcoming),
            "ongoing" => Some(EventStatus::Ongoing),
            "completed" => Some(EventStatus::Completed),
            "cancelled" => Some(EventStatus::Cancelled),
            _ => None,
        }
    }

    pub fn accepts_registrations(&self) -> bool {
        matches!(self, EventStatus::Upcoming | EventStatus::Ongoing)
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attendee {
    pub user_id: Uuid,
    pub payment_id: Option<String>,
    pub ticket_id: Uuid,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub user_id: Uuid,
    pub rating: i16,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub date: DateTime<Utc>,
    pub time: String,
    pub location: String,
    pub category: EventCategory,
    pub capacity: i32,
    pub ticket_price: Decimal,
    pub organizer_id: Uuid,
    pub attendees: Vec<Attendee>,
    pub feedback: Vec<Feedback>,
    pub status: EventStatus,
    pub registration_deadline: DateTime<Utc>,
    /// Attendees plus live seat holds. Maintained by the store only.
    pub reserved_seats: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub fn is_full(&self) -> bool {
        self.attendees.len() >= self.capacity as usize
    }

    pub fn is_free(&self) -> bool {
        self.ticket_price.is_zero()
    }

    pub fn seats_remaining(&self) -> i32 {
        (self.capacity - self.reserved_seats).max(0)
    }

    pub fn average_rating(&self) -> Option<f64> {
        if self.feedback.is_empty() {
            return None;
        }
        let total: i64 = self.feedback.iter().map(|f| i64::from(f.rating)).sum();
        Some(total as f64 / self.feedback.len() as f64)
    }

    pub fn has_attendee(&self, user_id: Uuid) -> bool {
        self.attendees.iter().any(|a| a.user_id == user_id)
    }

    pub fn view(&self) -> EventView {
        EventView {
            id: self.id,
            title: self.title.clone(),
            description: self.description.clone(),
            date: self.date,
            time: self.time.clone(),
            location: self.location.clone(),
            category: self.category,
            capacity: self.capacity,
            ticket_price: self.ticket_price,
            organizer_id: self.organizer_id,
            status: self.status,
            registration_deadline: self.registration_deadline,
            attendee_count: self.attendees.len(),
            seats_remaining: self.seats_remaining(),
            is_full: self.is_full(),
            average_rating: self.average_rating(),
            feedback_count: self.feedback.len(),
            created_at: self.created_at,
        }
    }
}

/// Deadline used when the organizer does not set one.
pub fn default_registration_deadline(date: DateTime<Utc>) -> DateTime<Utc> {
    date - Duration::days(1)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventView {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub date: DateTime<Utc>,
    pub time: String,
    pub location: String,
    pub category: EventCategory,
    pub capacity: i32,
    pub ticket_price: Decimal,
    pub organizer_id: Uuid,
    pub status: EventStatus,
    pub registration_deadline: DateTime<Utc>,
    pub attendee_count: usize,
    pub seats_remaining: i32,
    pub is_full: bool,
    pub average_rating: Option<f64>,
    pub feedback_count: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    #[validate(
        custom(function = "not_blank", message = "Title is required"),
        length(max = 200, message = "Title must be at most 200 characters")
    )]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub time: String,
    #[validate(custom(function = "not_blank", message = "Location is required"))]
    pub location: String,
    pub category: EventCategory,
    #[validate(range(min = 1, message = "Capacity must be a positive number"))]
    pub capacity: i32,
    #[serde(default)]
    pub ticket_price: Decimal,
    pub registration_deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EventPatch {
    #[validate(
        custom(function = "not_blank", message = "Title is required"),
        length(max = 200, message = "Title must be at most 200 characters")
    )]
    pub title: Option<String>,
    pub description: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub time: Option<String>,
    #[validate(custom(function = "not_blank", message = "Location is required"))]
    pub location: Option<String>,
    pub category: Option<EventCategory>,
    #[validate(range(min = 1, message = "Capacity must be a positive number"))]
    pub capacity: Option<i32>,
    pub ticket_price: Option<Decimal>,
    pub status: Option<EventStatus>,
    pub registration_deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewFeedback {
    #[validate(range(min = 1, max = 5, message = "Rating must be between 1 and 5"))]
    pub rating: i16,
    #[validate(length(max = 2000, message = "Comment must be at most 2000 characters"))]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilter {
    pub category: Option<EventCategory>,
    pub status: Option<EventStatus>,
}

impl EventFilter {
    pub fn matches(&self, event: &Event) -> bool {
        self.category.map_or(true, |c| c == event.category)
            && self.status.map_or(true, |s| s == event.status)
    }
}
