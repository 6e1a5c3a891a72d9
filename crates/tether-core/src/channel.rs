//! Peer channels and the local session.

use std::fmt;

use tether_proto::PeerAddress;

/// Transport handle identifying one channel within a participant.
///
/// Allocated by the [`ConnectionManager`](crate::ConnectionManager) for both
/// directions so the id space never collides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch#{}", self.0)
    }
}

/// Channel lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Waiting for transport confirmation.
    Opening,
    /// Confirmed and usable.
    Open,
    /// Timed out or disconnected. Terminal.
    Closed,
}

/// Which side established the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    /// Remote dialed us (we are hosting).
    Accepted,
    /// We dialed the remote.
    Initiated,
}

/// Live bidirectional link to exactly one remote participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// Transport handle.
    pub id: ChannelId,
    /// Remote participant.
    pub remote: PeerAddress,
    /// Lifecycle state.
    pub state: ChannelState,
    /// Direction.
    pub role: ChannelRole,
}

impl Channel {
    pub(crate) fn opening(id: ChannelId, remote: PeerAddress, role: ChannelRole) -> Self {
        Self { id, remote, state: ChannelState::Opening, role }
    }

    /// True when the channel can carry payloads.
    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }
}

/// Registration status with the rendezvous service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Registration sent, not yet acknowledged.
    Connecting,
    /// Registered; `address` is known.
    Open,
    /// Never opened, timed out, lost, or torn down.
    Closed,
}

impl SessionStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

/// The local participant's registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Address assigned by the rendezvous service. `None` until open.
    pub address: Option<PeerAddress>,
    /// Current status.
    pub status: SessionStatus,
}

impl Session {
    pub(crate) fn closed() -> Self {
        Self { address: None, status: SessionStatus::Closed }
    }

    /// True once registration is acknowledged (and not lost since).
    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::Open
    }
}
