pub mod job_queue;
pub mod job_worker;

pub use job_queue::*;
pub use job_worker::*;
