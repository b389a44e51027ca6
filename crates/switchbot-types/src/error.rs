//! Error types for data parsing in switchbot-types.

use thiserror::Error;

/// Errors that can occur when parsing SwitchBot identifiers and payloads.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in switchbot-core).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// Payload shorter than the layout requires.
    #[error("Insufficient bytes: expected at least {expected}, got {actual}")]
    InsufficientBytes { expected: usize, actual: usize },

    /// A field held a value outside its valid range.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// The model name is not one this crate knows about.
    #[error("Unknown model: {0}")]
    UnknownModel(String),
}

/// Result type alias using switchbot-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
