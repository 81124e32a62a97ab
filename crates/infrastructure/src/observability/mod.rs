//! Observability module
//!
//! 结构化事件日志与基于 `metrics` 门面的指标采集。
//! 指标导出器由宿主进程安装，这里只负责记录。

pub mod metrics_collector;
pub mod structured_logger;

pub use metrics_collector::MetricsCollector;
pub use structured_logger::StructuredLogger;
