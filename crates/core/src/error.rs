//! Error types for the core crate.

use thiserror::Error;

/// Core error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Locator was empty after trimming.
    #[error("Empty locator")]
    EmptyLocator,

    /// Locator could not be interpreted as a domain, URL or content-addressed URI.
    #[error("Invalid locator '{0}'")]
    InvalidLocator(String),

    /// Stored record key could not be parsed back.
    #[error("Invalid record key '{0}'")]
    InvalidRecordKey(String),
}

/// Result type alias for CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;
