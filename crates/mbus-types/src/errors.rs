//! # Error Types
//!
//! Errors raised while parsing addressing types.

use thiserror::Error;

/// Errors that can occur when parsing a [`crate::MessageAddress`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressParseError {
    /// The input is not of the form `endpoint:channel`.
    #[error("Malformed address {0:?}: expected `endpoint:channel`")]
    Malformed(String),

    /// The endpoint part is not a valid integer.
    #[error("Invalid endpoint id {0:?}")]
    InvalidEndpoint(String),

    /// The channel part is not a valid integer.
    #[error("Invalid channel id {0:?}")]
    InvalidChannel(String),
}
