//! Error types for cullforge.

use thiserror::Error;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid data error
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Out of bounds access
    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    /// A fixed-size reservation or buffer has no room left
    #[error("Capacity exceeded: {0}")]
    Capacity(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
