//! Error types shared across the SDSC crates

use thiserror::Error;

/// Result type alias for shared SDSC operations
pub type Result<T> = std::result::Result<T, SdscError>;

/// Errors raised by shared types and helpers
#[derive(Error, Debug)]
pub enum SdscError {
    #[error("Unknown category: '{0}'. Expected one of: stores, districts, zones, classifications")]
    UnknownCategory(String),

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),
}
