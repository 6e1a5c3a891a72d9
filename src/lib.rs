//! Tether workspace root.
//!
//! The crates live under `crates/`: `tether-proto` (wire types and framing),
//! `tether-core` (Sans-IO lifecycle and relay), `tether-node` (tokio runtime
//! and binaries) and `tether-harness` (simulation and property tests).
