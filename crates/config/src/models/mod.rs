pub mod app_config;
pub mod database;
pub mod flows;
pub mod logging;
pub mod scheduler;

pub use app_config::*;
pub use database::*;
pub use flows::*;
pub use logging::*;
pub use scheduler::*;
