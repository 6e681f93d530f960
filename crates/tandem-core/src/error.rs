//! Error types for Tandem Core

use thiserror::Error;

/// Core error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Value at {0} is not text")]
    NotText(String),

    #[error("Value at {path} is not a {expected}")]
    WrongContainer { path: String, expected: &'static str },

    #[error("Index {index} out of bounds at {path} (len {len})")]
    IndexOutOfBounds { path: String, index: usize, len: usize },

    #[error("Change length mismatch: expected document of length {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Changes cannot be composed: first produces length {first}, second expects {second}")]
    ComposeMismatch { first: usize, second: usize },

    #[error("Changes cannot be mapped: base lengths {left} and {right} differ")]
    MapMismatch { left: usize, right: usize },

    #[error("Invalid change set: {0}")]
    InvalidChange(String),
}

/// Result type alias for Tandem Core operations
pub type Result<T> = std::result::Result<T, Error>;
