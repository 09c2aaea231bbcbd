//! Error types for limitkit.
//!
//! The limiter primitives themselves never fail; these errors come from the
//! configuration layer around them.

use thiserror::Error;

/// Main error type for limitkit operations.
#[derive(Error, Debug)]
pub enum LimitError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for limitkit operations.
pub type Result<T> = std::result::Result<T, LimitError>;
