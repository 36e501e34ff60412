//! SDSC Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared domain types, error handling and logging for the commercial district
//! collection pipeline.
//!
//! # Overview
//!
//! - **Types**: categories, pagination cursors, raw records and collection runs
//! - **Error Handling**: the shared [`SdscError`] and [`Result`] alias
//! - **Logging**: `tracing` subscriber setup driven by [`logging::LogConfig`]
//!
//! # Example
//!
//! ```no_run
//! use sdsc_common::types::Category;
//!
//! let category: Category = "stores".parse().unwrap();
//! assert_eq!(category.table_name(), "stores");
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, SdscError};
