pub mod sqlite_data_flow_repository;
pub mod sqlite_data_flow_run_repository;

pub use sqlite_data_flow_repository::SqliteDataFlowRepository;
pub use sqlite_data_flow_run_repository::SqliteDataFlowRunRepository;
