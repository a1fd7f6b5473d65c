pub mod job;
pub mod message;
pub mod worker;

pub use job::*;
pub use message::*;
pub use worker::*;
