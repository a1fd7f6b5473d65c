pub mod dispatch;
pub mod queue_backend;

pub use dispatch::*;
pub use queue_backend::*;
