/// Utility modules
pub mod timestamps;

pub use timestamps::*;
