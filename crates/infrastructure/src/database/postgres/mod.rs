pub mod postgres_data_flow_repository;
pub mod postgres_data_flow_run_repository;

pub use postgres_data_flow_repository::PostgresDataFlowRepository;
pub use postgres_data_flow_run_repository::PostgresDataFlowRunRepository;
