pub mod activity;
pub mod job;
pub mod notification;
pub mod plan;
pub mod role;
pub mod sla;
pub mod subscription;
pub mod ticket;
pub mod usage;

pub use activity::*;
pub use job::*;
pub use notification::*;
pub use plan::*;
pub use role::*;
pub use sla::*;
pub use subscription::*;
pub use ticket::*;
pub use usage::*;
