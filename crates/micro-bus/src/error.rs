use crate::config::ConfigError;
use mbus_net::NetError;
use mbus_types::EndpointId;
use thiserror::Error;

/// Errors returned by the bus facade and channel handles.
#[derive(Debug, Error)]
pub enum BusError {
    /// The call was malformed (no group and no target, blank group).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The bus or channel is in a state that forbids the call.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Network layer failure.
    #[error("Network error: {0}")]
    Net(#[from] NetError),

    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The endpoint is not in the remote-node table.
    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(EndpointId),

    /// A reliable delivery was refused or timed out.
    #[error("Delivery failed: {0}")]
    Delivery(String),
}
