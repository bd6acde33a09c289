use thiserror::Error;

use vex_shared::error::{IdentityError, ProtocolError};
use vex_store::StoreError;

#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connector closed before the reply arrived")]
    Cancelled,

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Server rejected {operation}: {status}")]
    Rejected {
        operation: &'static str,
        status: String,
    },

    /// The server answered a request with an `error` frame.
    #[error("Server refused the request: {0}")]
    ServerError(String),

    #[error("No user matches {0}")]
    UserNotFound(String),

    #[error("{reference} matches {count} users, use the exact UUID")]
    AmbiguousUser { reference: String, count: usize },

    #[error("No channel found {0}")]
    UnknownChannel(String),

    #[error("Not currently in a channel")]
    NotInChannel,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
