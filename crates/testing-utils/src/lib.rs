//! # DataFlow Testing Utils
//!
//! Shared testing utilities for the data flow scheduler workspace:
//! in-memory repositories, test connectors and entity builders.
//!
//! ```toml
//! [dev-dependencies]
//! dataflow-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod connectors;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use connectors::*;
pub use helpers::*;
pub use mocks::*;
