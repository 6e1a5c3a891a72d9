//! Deterministic simulation harness for Tether.
//!
//! Two ways to run participants without real sockets or wall-clock time:
//!
//! - [`SimMesh`]: a Sans-IO world. Participants run on a shared
//!   [`ManualEnv`] clock and every action is routed through an in-memory
//!   event queue, with hooks to drop registrations, stall accepts or sever
//!   links. Used by the property tests.
//! - [`SimEnv`] + [`SimTransport`]: turmoil-based implementations of the
//!   `Environment` and `Transport` traits, so the real `Node` and
//!   `RendezvousServer` run unchanged over a simulated network.
//!
//! # Model-Based Testing
//!
//! [`Operation`] is the set of actions proptest generates; [`SimMesh::apply`]
//! executes them and the tests check invariants after every step.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod manual_env;
pub mod mesh;
pub mod operation;
pub mod sim_env;
pub mod sim_transport;

pub use manual_env::{ManualEnv, SimInstant};
pub use mesh::{MeshNode, NodeId, Resolution, SimMesh};
pub use operation::{Operation, OperationNode, OperationResult};
pub use sim_env::SimEnv;
pub use sim_transport::{SimListener, SimTransport};
