pub mod notification_service;
pub mod sla_service;
pub mod subscription_service;
pub mod ticket_service;
pub mod usage_service;

pub use notification_service::NotificationService;
pub use sla_service::SlaService;
pub use subscription_service::{RolloverOutcome, SubscriptionService};
pub use ticket_service::TicketService;
pub use usage_service::UsageService;
