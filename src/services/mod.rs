pub mod catalog;
pub mod identity;
pub mod notify;
pub mod payment;
pub mod registration;
pub mod tickets;
