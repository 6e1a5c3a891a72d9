//! Core error types.

use tether_proto::{PeerAddress, ProtoError};
use thiserror::Error;

/// Synchronous failures of lifecycle operations and failed deferred results.
///
/// Asynchronous transport trouble is never returned through this type on its
/// own; it lands in the fault log first, and only the resolution of a pending
/// `open_session` or `connect_to_peer` carries it back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The session is not open (never opened, timed out, or lost).
    #[error("not connected to signaling server")]
    NotConnected,

    /// `open_session` while a session is already connecting or open.
    #[error("session already {status}")]
    SessionActive {
        /// Current status, for the message.
        status: &'static str,
    },

    /// Registration was not acknowledged within the deadline.
    #[error("failed to establish connection with signaling server")]
    SignalingTimeout,

    /// Outbound channel was not confirmed within the deadline or closed
    /// before opening.
    #[error("failed to establish connection with host: {address}")]
    HostConnectFailed {
        /// Address that could not be reached.
        address: PeerAddress,
    },

    /// Attempted to connect to our own address.
    #[error("refusing to connect to own address: {address}")]
    SelfConnect {
        /// Our own address.
        address: PeerAddress,
    },

    /// Submitted message text was empty.
    #[error("message text is empty")]
    EmptyMessage,

    /// Pending operation abandoned because the session closed.
    #[error("operation cancelled: session closed")]
    Cancelled,
}

impl ConnectionError {
    /// Returns true for failures of a synchronous precondition.
    ///
    /// These are rejected before any state changes; the caller fixes the
    /// precondition and retries. The rest are outcomes of deferred attempts.
    pub fn is_precondition(&self) -> bool {
        match self {
            Self::NotConnected
            | Self::SessionActive { .. }
            | Self::SelfConnect { .. }
            | Self::EmptyMessage => true,

            Self::SignalingTimeout | Self::HostConnectFailed { .. } | Self::Cancelled => false,
        }
    }
}

/// Errors reading or writing frames on a stream.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Underlying socket failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Proto(#[from] ProtoError),

    /// Peer closed the stream where a frame was required.
    #[error("stream closed by peer")]
    Closed,
}
