//! Error types for id parsing.

use thiserror::Error;

/// Errors that can occur when parsing typed ids.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The string is not a valid allocation id.
    #[error("invalid allocation id: {0}")]
    InvalidAllocationId(String),
}
