//! Turmoil environment.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tether_core::Environment;

/// Wall clock reported at simulation start (2024-01-01T00:00:00Z).
const SIM_EPOCH_MILLIS: u64 = 1_704_067_200_000;

/// Environment for code running inside a turmoil host.
///
/// Time is tokio's, which turmoil drives virtually; randomness comes from a
/// seeded ChaCha RNG so runs replay exactly.
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl SimEnv {
    /// Environment with seed 0.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment with an explicit seed.
    pub fn with_seed(seed: u64) -> Self {
        tracing::debug!(seed, "simulation RNG seeded");
        Self { rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))) }
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> tokio::time::Instant {
        tokio::time::Instant::now()
    }

    fn unix_millis(&self) -> u64 {
        let elapsed = turmoil::sim_elapsed().unwrap_or_default();
        SIM_EPOCH_MILLIS + u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}
