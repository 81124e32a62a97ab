pub mod app;
pub mod shutdown;

pub use app::{AppMode, Application, FlowSummary};
pub use shutdown::ShutdownManager;
