pub mod app;
pub mod shutdown;

pub use app::{AppOptions, Application};
pub use shutdown::ShutdownManager;
