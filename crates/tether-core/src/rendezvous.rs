//! Rendezvous address registry.
//!
//! Backs the rendezvous service: hands out fresh [`PeerAddress`]es and maps
//! them to the endpoint each participant advertised for direct channels.

use std::{collections::HashMap, net::SocketAddr};

use tether_proto::PeerAddress;

use crate::env::Environment;

/// Address directory. Sans-IO; the server wraps it in a lock.
#[derive(Debug)]
pub struct Rendezvous<E: Environment> {
    env: E,
    endpoints: HashMap<PeerAddress, SocketAddr>,
}

impl<E: Environment> Rendezvous<E> {
    /// Empty registry.
    pub fn new(env: E) -> Self {
        Self { env, endpoints: HashMap::new() }
    }

    /// Mint an address for `endpoint`.
    ///
    /// Addresses are 16 lowercase hex characters drawn from the environment
    /// RNG and never collide with a registered one.
    pub fn register(&mut self, endpoint: SocketAddr) -> PeerAddress {
        let address = loop {
            let candidate = PeerAddress::new(format!("{:016x}", self.env.random_u64()));
            if !self.endpoints.contains_key(&candidate) {
                break candidate;
            }
        };

        tracing::info!(%address, %endpoint, "registered");
        self.endpoints.insert(address.clone(), endpoint);
        address
    }

    /// Endpoint advertised by `address`.
    pub fn lookup(&self, address: &PeerAddress) -> Option<SocketAddr> {
        self.endpoints.get(address).copied()
    }

    /// Drop `address`. Returns whether it was registered.
    pub fn unregister(&mut self, address: &PeerAddress) -> bool {
        let removed = self.endpoints.remove(address).is_some();
        if removed {
            tracing::info!(%address, "unregistered");
        }
        removed
    }

    /// Number of registered participants.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// True when nobody is registered.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
