//! # Orchestrator Testing Utils
//!
//! Shared testing utilities for the crawl orchestrator workspace: in-memory
//! mocks of every port trait and builders for test data.
//!
//! ```toml
//! [dev-dependencies]
//! orchestrator-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod mocks;

pub use builders::*;
pub use mocks::*;
