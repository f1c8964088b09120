pub mod period;
pub mod permissions;
pub mod quota;
pub mod sla_deadline;
pub mod state_machine;

pub use period::*;
pub use permissions::*;
pub use quota::*;
pub use sla_deadline::*;
pub use state_machine::*;
