//! Hand-driven clock for Sans-IO simulations.

use std::{
    ops::{Add, Sub},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tether_core::Environment;

/// Virtual instant: time since the simulation started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimInstant(Duration);

impl Add<Duration> for SimInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs)
    }
}

impl Sub for SimInstant {
    type Output = Duration;

    fn sub(self, other: Self) -> Duration {
        self.0.saturating_sub(other.0)
    }
}

/// Environment whose clock only moves when [`ManualEnv::advance`] is called.
///
/// Clones share the clock and the RNG, so every participant of a mesh sees the
/// same time.
#[derive(Clone)]
pub struct ManualEnv {
    millis: Arc<AtomicU64>,
    epoch_millis: u64,
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl ManualEnv {
    /// Clock at zero, wall clock at the unix epoch.
    pub fn with_seed(seed: u64) -> Self {
        Self::starting_at(seed, 0)
    }

    /// Clock at zero, wall clock at `epoch_millis`.
    pub fn starting_at(seed: u64, epoch_millis: u64) -> Self {
        Self {
            millis: Arc::new(AtomicU64::new(0)),
            epoch_millis,
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, duration: Duration) {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.millis.fetch_add(ms, Ordering::SeqCst);
    }

    /// Milliseconds since the simulation started.
    pub fn elapsed_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

impl Environment for ManualEnv {
    type Instant = SimInstant;

    fn now(&self) -> SimInstant {
        SimInstant(Duration::from_millis(self.elapsed_millis()))
    }

    fn unix_millis(&self) -> u64 {
        self.epoch_millis + self.elapsed_millis()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        // Sleeping is advancing.
        self.advance(duration);
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}

impl std::fmt::Debug for ManualEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualEnv").field("millis", &self.elapsed_millis()).finish_non_exhaustive()
    }
}
