pub mod account;
pub mod event;
pub mod hold;
pub mod ticket;

pub use account::{normalize_email, Account, AccountView, Role};
pub use event::{
    default_registration_deadline, Attendee, Event, EventCategory, EventFilter, EventPatch,
    EventStatus, EventView, Feedback, NewEvent, NewFeedback,
};
pub use hold::{PaymentOrder, SeatHold};
pub use ticket::{Ticket, TicketStatus};
