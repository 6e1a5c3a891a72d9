//! Operations for model-based testing.
//!
//! Operations are every action a test can take against a [`SimMesh`]: the
//! participant-facing calls plus the faults the mesh can inject. They are
//! generated randomly by proptest and applied in sequence.

use std::time::Duration;

use arbitrary::Arbitrary;
use tether_core::ConnectionError;
use tether_proto::WorldSnapshot;

use crate::mesh::SimMesh;

/// Node index as generated; reduced modulo the mesh size when applied.
pub type OperationNode = u8;

/// Operations that can be applied to a mesh.
#[derive(Debug, Clone, Arbitrary)]
pub enum Operation {
    /// Register with the rendezvous service.
    OpenSession {
        /// Acting node.
        node: OperationNode,
    },

    /// Start accepting peers.
    BecomeHost {
        /// Acting node.
        node: OperationNode,
    },

    /// Connect to another node's address.
    Connect {
        /// Acting node.
        node: OperationNode,
        /// Node whose address is dialed.
        target: OperationNode,
    },

    /// Submit a chat message.
    Submit {
        /// Acting node.
        node: OperationNode,
        /// Text seed; zero produces an empty message.
        seed: u8,
    },

    /// Replace and broadcast the world snapshot.
    UpdateSnapshot {
        /// Acting node.
        node: OperationNode,
        /// Snapshot contents.
        seed: u8,
    },

    /// Close the session.
    CloseSession {
        /// Acting node.
        node: OperationNode,
    },

    /// Close every channel between two nodes at the transport level.
    Sever {
        /// One end.
        a: OperationNode,
        /// Other end.
        b: OperationNode,
    },

    /// Advance time and tick every node.
    Advance {
        /// Milliseconds to advance.
        millis: u16,
    },

    /// Stop acknowledging a node's registrations.
    DropRegistration {
        /// Affected node.
        node: OperationNode,
    },

    /// Stop confirming channels a node accepts.
    StallAccept {
        /// Affected node.
        node: OperationNode,
    },

    /// Remove every injected fault.
    Heal,
}

impl Operation {
    /// Message text for a `Submit` seed.
    pub fn text(seed: u8) -> String {
        if seed == 0 { String::new() } else { format!("m{seed}") }
    }
}

/// Result of applying an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    /// Operation was accepted. Deferred outcomes show up in the mesh's resolutions.
    Ok,

    /// Operation was rejected synchronously.
    Rejected(ConnectionError),
}

impl OperationResult {
    /// Check if operation succeeded.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Check if operation failed.
    pub fn is_err(&self) -> bool {
        !self.is_ok()
    }
}

impl<T> From<Result<T, ConnectionError>> for OperationResult {
    fn from(result: Result<T, ConnectionError>) -> Self {
        match result {
            Ok(_) => Self::Ok,
            Err(e) => Self::Rejected(e),
        }
    }
}

impl SimMesh {
    /// Apply `operation` and deliver everything it causes.
    ///
    /// # Panics
    ///
    /// Panics on an empty mesh.
    pub fn apply(&mut self, operation: &Operation) -> OperationResult {
        assert!(!self.is_empty(), "operations need at least one node");
        let len = self.len();
        let pick = move |n: OperationNode| usize::from(n) % len;

        let result = match *operation {
            Operation::OpenSession { node } => self.open_session(pick(node)).into(),
            Operation::BecomeHost { node } => self.become_host(pick(node)).into(),
            Operation::Connect { node, target } => self.connect(pick(node), pick(target)).into(),
            Operation::Submit { node, seed } => {
                self.submit(pick(node), &Operation::text(seed)).into()
            },
            Operation::UpdateSnapshot { node, seed } => {
                self.update_snapshot(pick(node), WorldSnapshot::new(vec![seed; 4]));
                OperationResult::Ok
            },
            Operation::CloseSession { node } => {
                self.close_session(pick(node));
                OperationResult::Ok
            },
            Operation::Sever { a, b } => {
                self.sever(pick(a), pick(b));
                OperationResult::Ok
            },
            Operation::Advance { millis } => {
                self.advance(Duration::from_millis(u64::from(millis)));
                OperationResult::Ok
            },
            Operation::DropRegistration { node } => {
                self.drop_registration(pick(node));
                OperationResult::Ok
            },
            Operation::StallAccept { node } => {
                self.stall_accept(pick(node));
                OperationResult::Ok
            },
            Operation::Heal => {
                self.heal();
                OperationResult::Ok
            },
        };

        self.run_until_idle();
        result
    }
}
