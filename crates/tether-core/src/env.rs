//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples the connection state machines from
//! system resources (time, randomness). This enables:
//!
//! - Deterministic Simulation: the harness provides a virtual clock and seeded
//!   RNG, so every timeout race replays identically.
//!
//! - Production Runtime: the node uses real system resources without any code
//!   changes to the lifecycle logic.
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Determinism: Given the same seed, `random_bytes()` produces the same
//!   sequence
//! - Isolation: Implementations must not share global state

use std::{
    fmt::Debug,
    future::Future,
    ops::{Add, Sub},
    time::Duration,
};

/// Monotonic point in time as seen by the state machines.
///
/// Implemented for any type with instant arithmetic; `std::time::Instant`,
/// `tokio::time::Instant` and the harness's virtual instant all qualify.
pub trait Timepoint:
    Copy
    + Ord
    + Debug
    + Send
    + Sync
    + 'static
    + Sub<Output = Duration>
    + Add<Duration, Output = Self>
{
}

impl<T> Timepoint for T where
    T: Copy
        + Ord
        + Debug
        + Send
        + Sync
        + 'static
        + Sub<Output = Duration>
        + Add<Duration, Output = Self>
{
}

/// Abstract environment providing time, randomness, and async primitives.
///
/// This trait is the foundation of the Sans-IO architecture: the manager and
/// relay never read a clock or an entropy source directly.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// 1. Time monotonicity: `now()` never goes backwards
/// 2. Minimal panics: Methods are infallible except in exceptional
///    circumstances (e.g., OS entropy exhaustion, incorrect simulation setup)
pub trait Environment: Clone + Send + Sync + 'static {
    /// Monotonic instant type used for deadlines.
    type Instant: Timepoint;

    /// Returns the current monotonic time.
    ///
    /// # Invariants
    ///
    /// - Monotonicity: Subsequent calls must return times >= previous calls.
    fn now(&self) -> Self::Instant;

    /// Wall-clock time in unix epoch milliseconds.
    ///
    /// Used for message and fault timestamps, which are compared across
    /// participants. Not required to be monotonic.
    fn unix_millis(&self) -> u64;

    /// Sleeps for the specified duration.
    ///
    /// Only driver code awaits this; the state machines never do.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Determinism during simulations: Given the same RNG seed, this produces
    ///   the same sequence of bytes
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    ///
    /// Convenience for minting peer addresses.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
