//! Rendezvous signaling and channel handshake frames.
//!
//! # Registration and lookup
//!
//! ```text
//! Participant                 Rendezvous
//!   │─── Register{port} ──────────►│   assigns a fresh address
//!   │◄── Registered{address} ──────│
//!   │─── Lookup{address} ─────────►│
//!   │◄── Located{address, endpoint}│   or Unknown{address}
//! ```
//!
//! # Channel handshake
//!
//! ```text
//! Initiator                   Acceptor
//!   │─── Hello{from} ─────────────►│   acceptor reports an inbound channel
//!   │◄── HelloAck ─────────────────│   both sides consider the channel open
//! ```

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::PeerAddress;

/// Frames exchanged with the rendezvous service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    /// Ask for an address. `port` is where the participant accepts channels;
    /// the service pairs it with the IP it observes on the signaling socket.
    Register {
        /// Channel listen port advertised by the participant.
        port: u16,
    },

    /// Registration acknowledged.
    Registered {
        /// Address assigned to the participant.
        address: PeerAddress,
    },

    /// Resolve an address to a dialable endpoint.
    Lookup {
        /// Address to resolve.
        address: PeerAddress,
    },

    /// Successful lookup.
    Located {
        /// Address that was resolved.
        address: PeerAddress,
        /// Endpoint accepting channels for that address.
        endpoint: SocketAddr,
    },

    /// Lookup for an address that is not registered.
    Unknown {
        /// Address that was not found.
        address: PeerAddress,
    },
}

/// First frames on a newly dialed peer channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Handshake {
    /// Initiator introduces itself.
    Hello {
        /// Initiator's registered address.
        from: PeerAddress,
    },
    /// Acceptor confirms the channel.
    HelloAck,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{decode_frame, encode_frame};

    #[test]
    fn located_carries_endpoint() {
        let endpoint: SocketAddr = "10.0.0.7:7000".parse().unwrap();
        let signal = Signal::Located { address: PeerAddress::new("ab12"), endpoint };

        let frame = encode_frame(&signal).unwrap();
        assert_eq!(decode_frame::<Signal>(&frame).unwrap(), signal);
    }

    #[test]
    fn handshake_is_not_a_signal() {
        let frame = encode_frame(&Handshake::HelloAck).unwrap();
        assert!(decode_frame::<Signal>(&frame).is_err());
    }
}
