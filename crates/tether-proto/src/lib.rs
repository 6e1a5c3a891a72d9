//! Tether wire protocol.
//!
//! Every byte that crosses a socket in Tether is a length-prefixed CBOR frame.
//! This crate owns the shapes of those frames and the codec that produces
//! them; it performs no I/O.
//!
//! # Frames
//!
//! ```text
//! ┌─────────────┬─────────────────────────────────┐
//! │ Length (4B) │ Body (CBOR, big-endian length)  │
//! └─────────────┴─────────────────────────────────┘
//! ```
//!
//! Three families of bodies travel inside frames:
//!
//! - [`Signal`]: participant ↔ rendezvous service (registration, lookup)
//! - [`Handshake`]: first frames on a fresh peer channel
//! - [`Payload`]: application data on an open peer channel, an explicitly
//!   tagged union of [`Message`] and [`WorldSnapshot`]

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod error;
pub mod frame;
pub mod payload;
pub mod signal;
mod address;

pub use address::PeerAddress;
pub use error::ProtoError;
pub use frame::{HEADER_LEN, MAX_FRAME_SIZE, decode_body, decode_frame, encode_frame, frame_len};
pub use payload::{Message, MessageKey, Payload, WorldSnapshot};
pub use signal::{Handshake, Signal};
