pub mod manager;
pub(crate) mod mapping;
pub mod postgres;
pub mod sqlite;

pub use manager::{DatabaseManager, DatabasePool, DatabaseType};
pub use postgres::{PostgresDataFlowRepository, PostgresDataFlowRunRepository};
pub use sqlite::{SqliteDataFlowRepository, SqliteDataFlowRunRepository};
