//! 内置连接器与连接器注册表

pub mod inline;
pub mod jsonl;
pub mod log_sink;
mod options;
pub mod registry;
pub mod runtimes;

pub use inline::InlineSource;
pub use jsonl::{JsonlFileSink, JsonlFileSource};
pub use log_sink::LogSink;
pub use registry::{ConnectorRegistry, RuntimeFactory, SinkFactory, SourceFactory};
pub use runtimes::{DefaultRuntime, FieldMapRuntime};
