pub mod sla;
pub mod subscriptions;
pub mod tickets;
pub mod usage;
