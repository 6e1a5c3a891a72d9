//! Runtime error types.

use tether_core::{ConnectionError, TransportError};
use tether_proto::ProtoError;
use thiserror::Error;

/// Errors surfaced by the node runtime and the rendezvous server.
#[derive(Debug, Error)]
pub enum NodeError {
    /// A lifecycle operation was rejected or its deferred attempt failed.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Socket failure (bind, accept).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame read/write failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Encoding failure.
    #[error("protocol error: {0}")]
    Proto(#[from] ProtoError),

    /// The node's event loop is gone.
    #[error("node stopped")]
    Stopped,
}

impl NodeError {
    /// Returns true if the node cannot serve further commands.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Stopped | Self::Io(_) => true,
            Self::Connection(_) | Self::Transport(_) | Self::Proto(_) => false,
        }
    }
}
