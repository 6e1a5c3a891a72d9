//! Tether core: Sans-IO connection lifecycle and relay.
//!
//! # Architecture
//!
//! Action-based state machines. Every operation takes input and returns
//! actions for the runtime to execute; nothing in this crate performs I/O.
//!
//! - [`ConnectionManager`]: session registration, host/peer channels,
//!   deadlines, fault classification
//! - [`RelayCoordinator`]: snapshot broadcast, host relay without echo,
//!   duplicate suppression
//! - [`WorldStore`]: the replicated world snapshot and the timestamp-ordered
//!   message log
//! - [`Participant`]: the three above behind one event dispatch
//! - [`Rendezvous`]: address registry backing the rendezvous service
//!
//! Time and randomness come from an [`Environment`], so the same code runs in
//! production and under deterministic simulation.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod channel;
pub mod deadline;
pub mod env;
pub mod error;
pub mod fault;
pub mod manager;
pub mod participant;
pub mod relay;
pub mod rendezvous;
pub mod store;
pub mod transport;

pub use channel::{Channel, ChannelId, ChannelRole, ChannelState, Session, SessionStatus};
pub use deadline::{Deadline, DeadlineState, Settlement};
pub use env::{Environment, Timepoint};
pub use error::{ConnectionError, TransportError};
pub use fault::{FaultKind, FaultLog, NetworkFault};
pub use manager::{
    ConnectOutcome, ConnectionManager, DEFAULT_CONNECTION_TIMEOUT, ManagerAction, ManagerConfig,
    ManagerEvent,
};
pub use participant::{Participant, ParticipantAction, ParticipantEvent};
pub use relay::{RelayAction, RelayCoordinator, Role};
pub use rendezvous::Rendezvous;
pub use store::{MemoryStore, MessageLog, WorldStore};
pub use transport::{Listener, Transport, read_frame, read_frame_bytes, write_frame};
