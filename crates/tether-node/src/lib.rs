//! Tether participant runtime.
//!
//! This crate runs the Sans-IO core on tokio:
//! - TCP for the rendezvous link and direct channels
//! - System time and OS randomness
//! - A reference world (turn counter) for snapshot broadcast
//!
//! ## Architecture
//!
//! ```text
//! tether-node
//!   ├─ SystemEnv          (production Environment impl)
//!   ├─ TcpTransport       (tokio TCP)
//!   ├─ Node / NodeHandle  (single event loop around a Participant)
//!   ├─ RendezvousServer   (address registry over signaling connections)
//!   └─ World              (reference snapshot producer)
//! ```
//!
//! Both [`Node`] and [`RendezvousServer`] are generic over the environment
//! and transport, so the simulation harness runs them unchanged.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod node;
mod rendezvous;
mod system_env;
mod tcp;
pub mod world;

pub use config::{NodeConfig, RendezvousConfig};
pub use error::NodeError;
pub use node::{Node, NodeHandle, NodeStatus, Notice};
pub use rendezvous::RendezvousServer;
pub use system_env::SystemEnv;
pub use tcp::{TcpTransport, TcpTransportListener};
pub use world::{World, WorldTime};
