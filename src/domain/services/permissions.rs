use serde::{Deserialize, Serialize};

use crate::domain::entities::{Actor, Role, Ticket};
use crate::domain::errors::{DomainError, DomainResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    CreateTicket,
    ViewTicket,
    AddMessage,
    ReopenTicket,
    CloseTicket,
    UpdateTicket,
    AssignTicket,
    ResolveTicket,
    BulkUpdate,
    MergeTickets,
    ViewUsage,
    DeleteTickets,
    ManageSlaPolicies,
    ManageSubscription,
    RecordUsage,
}

const CUSTOMER: &[Capability] = &[
    Capability::CreateTicket,
    Capability::ViewTicket,
    Capability::AddMessage,
    Capability::ReopenTicket,
    Capability::CloseTicket,
];

const AGENT: &[Capability] = &[
    Capability::UpdateTicket,
    Capability::AssignTicket,
    Capability::ResolveTicket,
    Capability::BulkUpdate,
    Capability::MergeTickets,
    Capability::ViewUsage,
];

const ADMIN: &[Capability] = &[
    Capability::DeleteTickets,
    Capability::ManageSlaPolicies,
    Capability::ManageSubscription,
    Capability::RecordUsage,
];

impl Role {
    /// Roles are cumulative: each one holds everything below it.
    pub fn has(&self, capability: Capability) -> bool {
        CUSTOMER.contains(&capability)
            || (*self >= Role::Agent && AGENT.contains(&capability))
            || (*self >= Role::Admin && ADMIN.contains(&capability))
    }
}

pub fn ensure(actor: &Actor, capability: Capability) -> DomainResult<()> {
    if actor.role.has(capability) {
        Ok(())
    } else {
        Err(DomainError::Forbidden(format!(
            "Role '{}' may not perform {:?}",
            actor.role, capability
        )))
    }
}

pub fn ensure_same_organization(actor: &Actor, organization_id: &str) -> DomainResult<()> {
    if actor.organization_id == organization_id {
        Ok(())
    } else {
        Err(DomainError::Forbidden(
            "Resource belongs to another organization".to_string(),
        ))
    }
}

/// Tenant check plus ownership: customers only reach their own tickets.
pub fn ensure_ticket_access(
    actor: &Actor,
    ticket: &Ticket,
    capability: Capability,
) -> DomainResult<()> {
    ensure_same_organization(actor, &ticket.organization_id)?;
    ensure(actor, capability)?;
    if !actor.role.is_staff() && ticket.customer_id != actor.user_id {
        return Err(DomainError::Forbidden(
            "Customers can only access their own tickets".to_string(),
        ));
    }
    Ok(())
}
