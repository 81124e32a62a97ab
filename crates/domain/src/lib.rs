pub mod connectors;
pub mod descriptor;
pub mod entities;
pub mod repositories;
pub mod runtime_policy;

pub use connectors::*;
pub use dataflow_errors::{DataFlowError, DataFlowResult};
pub use descriptor::*;
pub use entities::*;
pub use repositories::*;
pub use runtime_policy::*;
