//! 数据流调度核心
//!
//! 注册与管理数据流、按心跳执行到期的批次、启动时整理遗留状态、定期清理历史运行记录。

pub mod batch_executor;
pub mod cleanup_service;
pub mod data_flow_service;
pub mod heartbeat;
pub mod startup_service;

pub use batch_executor::{BatchExecutor, BatchOutcome};
pub use cleanup_service::RunCleanupService;
pub use data_flow_service::DataFlowService;
pub use heartbeat::{FlowTick, HeartbeatReport, HeartbeatScheduler};
pub use startup_service::{StartupReport, StartupService, INTERRUPTED_MESSAGE};
