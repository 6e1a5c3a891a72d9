//! Network fault records.
//!
//! Faults are the asynchronous half of error handling: timeouts and later
//! disconnections are appended here instead of being returned through any call
//! stack. The log only grows.

use std::fmt;

use tether_proto::PeerAddress;

/// Classification of an asynchronous network failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Rendezvous registration not confirmed within the deadline.
    SignalingTimeout,
    /// Rendezvous link closed after the session was open.
    SignalingLost,
    /// Inbound channel not confirmed within the deadline.
    PeerConnectFailed,
    /// Accepted channel closed after opening.
    PeerConnectionLost,
    /// Outbound channel not confirmed within the deadline.
    HostConnectFailed,
    /// Initiated channel closed after opening.
    HostConnectionLost,
}

/// One recorded failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkFault {
    /// What went wrong.
    pub kind: FaultKind,
    /// Remote participant involved, if any.
    pub remote: Option<PeerAddress>,
    /// When it was recorded, unix epoch milliseconds.
    pub timestamp: u64,
}

impl NetworkFault {
    /// Fault without a remote (signaling faults).
    pub fn signaling(kind: FaultKind, timestamp: u64) -> Self {
        Self { kind, remote: None, timestamp }
    }

    /// Fault attributed to a remote participant.
    pub fn peer(kind: FaultKind, remote: PeerAddress, timestamp: u64) -> Self {
        Self { kind, remote: Some(remote), timestamp }
    }
}

impl fmt::Display for NetworkFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let remote = self.remote.as_ref().map_or("<none>", PeerAddress::as_str);
        match self.kind {
            FaultKind::SignalingTimeout => {
                write!(f, "failed to establish connection with signaling server")
            },
            FaultKind::SignalingLost => write!(f, "lost connection with signaling server"),
            FaultKind::PeerConnectFailed => {
                write!(f, "failed to establish incoming connection with peer: {remote}")
            },
            FaultKind::PeerConnectionLost => write!(f, "lost connection with peer: {remote}"),
            FaultKind::HostConnectFailed => {
                write!(f, "failed to establish connection with host: {remote}")
            },
            FaultKind::HostConnectionLost => write!(f, "lost connection with host: {remote}"),
        }
    }
}

/// Append-only fault log.
#[derive(Debug, Clone, Default)]
pub struct FaultLog {
    faults: Vec<NetworkFault>,
}

impl FaultLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fault.
    pub fn record(&mut self, fault: NetworkFault) {
        tracing::warn!(kind = ?fault.kind, remote = ?fault.remote, "{fault}");
        self.faults.push(fault);
    }

    /// All faults in recording order.
    pub fn faults(&self) -> &[NetworkFault] {
        &self.faults
    }

    /// Number of recorded faults.
    pub fn len(&self) -> usize {
        self.faults.len()
    }

    /// True when nothing has failed yet.
    pub fn is_empty(&self) -> bool {
        self.faults.is_empty()
    }

    /// Number of faults of `kind`.
    pub fn count(&self, kind: FaultKind) -> usize {
        self.faults.iter().filter(|f| f.kind == kind).count()
    }

    /// Number of faults of `kind` attributed to `remote`.
    pub fn count_for(&self, kind: FaultKind, remote: &PeerAddress) -> usize {
        self.faults.iter().filter(|f| f.kind == kind && f.remote.as_ref() == Some(remote)).count()
    }
}
