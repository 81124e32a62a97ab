//! 数据流调度器的存储与可观测性实现
//!
//! SQLite 与 PostgreSQL 两套仓储共享同一组领域 trait，由 [`DatabaseManager`]
//! 按连接串选择。

pub mod database;
pub mod error_handling;
pub mod observability;

pub use database::*;
pub use error_handling::{is_unique_violation, RepositoryErrorHelpers, RepositoryOperation};
pub use observability::*;
