//! Role checks, kept in one place so handlers and services agree on who may
//! do what.

use crate::models::{Account, Event, Role};
use crate::utils::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    RegisterForEvents,
    CreateEvents,
    ManageAnyEvent,
    CheckInTickets,
    ViewEventTickets,
    ManageRoles,
}

impl Capability {
    /// The lowest role holding this capability.
    pub fn minimum_role(&self) -> Role {
        match self {
            Capability::RegisterForEvents => Role::Student,
            Capability::CreateEvents
            | Capability::CheckInTickets
            | Capability::ViewEventTickets => Role::Organizer,
            Capability::ManageAnyEvent | Capability::ManageRoles => Role::Admin,
        }
    }
}

fn rank(role: Role) -> u8 {
    match role {
        Role::Student => 0,
        Role::Organizer => 1,
        Role::Admin => 2,
    }
}

pub fn allows(role: Role, capability: Capability) -> bool {
    rank(role) >= rank(capability.minimum_role())
}

pub fn require(account: &Account, capability: Capability) -> AppResult<()> {
    if allows(account.role, capability) {
        Ok(())
    } else {
        Err(AppError::RoleRequired {
            required: capability.minimum_role(),
            current: account.role,
        })
    }
}

pub fn can_manage_event(account: &Account, event: &Event) -> bool {
    event.organizer_id == account.id || allows(account.role, Capability::ManageAnyEvent)
}

/// Capability check followed by ownership of `event`.
pub fn require_event_manager(
    account: &Account,
    event: &Event,
    capability: Capability,
    action: &str,
) -> AppResult<()> {
    require(account, capability)?;
    if can_manage_event(account, event) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "Only the event organizer or an admin can {}",
            action
        )))
    }
}
