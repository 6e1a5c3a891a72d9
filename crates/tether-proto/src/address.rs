//! Peer addresses.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque, globally unique identifier of a participant's transport endpoint.
///
/// Assigned by the rendezvous service when a session opens and never changed
/// afterwards. Ordering is lexicographic and only exists so addresses can key
/// ordered collections.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerAddress(String);

impl PeerAddress {
    /// Wrap a raw address string.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Borrow the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerAddress({})", self.0)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerAddress {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PeerAddress {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_raw_string() {
        let address = PeerAddress::new("H1");
        assert_eq!(address.to_string(), "H1");
        assert_eq!(format!("{address:?}"), "PeerAddress(H1)");
    }

    #[test]
    fn ordering_is_lexicographic() {
        assert!(PeerAddress::from("a") < PeerAddress::from("b"));
    }
}
