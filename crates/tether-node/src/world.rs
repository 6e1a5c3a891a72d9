//! Reference world: a turn counter and a time accumulator.
//!
//! Times are milliseconds on whatever clock the caller passes to
//! [`World::update`]; only differences between updates matter.

use serde::{Deserialize, Serialize};
use tether_proto::{ProtoError, WorldSnapshot};

/// Time bookkeeping advanced on every update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldTime {
    /// Milliseconds between the last two updates.
    pub delta: u64,
    /// Sum of all deltas.
    pub elapsed: u64,
    /// Clock reading at the last update.
    pub then: u64,
}

/// Replicated world state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct World {
    /// Number of updates applied.
    pub turn: u64,
    /// Time accumulator.
    pub time: WorldTime,
}

impl World {
    /// Fresh world at turn zero, anchored at `now`.
    pub fn new(now: u64) -> Self {
        Self { turn: 0, time: WorldTime { delta: 0, elapsed: 0, then: now } }
    }

    /// Advance time to `now`, then the turn.
    ///
    /// A clock reading earlier than the last one counts as zero delta.
    pub fn update(&mut self, now: u64) {
        let delta = now.saturating_sub(self.time.then);
        self.time.delta = delta;
        self.time.elapsed += delta;
        self.time.then = now;
        self.turn += 1;
    }

    /// Encode for broadcast.
    pub fn to_snapshot(&self) -> Result<WorldSnapshot, ProtoError> {
        WorldSnapshot::encode(self)
    }

    /// Decode a received snapshot.
    pub fn from_snapshot(snapshot: &WorldSnapshot) -> Result<Self, ProtoError> {
        snapshot.decode()
    }

    /// Continue from the store's current snapshot.
    ///
    /// An empty snapshot means nobody has published a world yet and leaves
    /// `self` as is.
    pub fn adopt(&mut self, snapshot: &WorldSnapshot) -> Result<(), ProtoError> {
        if !snapshot.is_empty() {
            *self = Self::from_snapshot(snapshot)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn update_advances_time_then_turn() {
        let mut world = World::new(1000);
        world.update(1016);
        world.update(1050);

        assert_eq!(world.turn, 2);
        assert_eq!(world.time, WorldTime { delta: 34, elapsed: 50, then: 1050 });
    }

    #[test]
    fn clock_going_backwards_is_zero_delta() {
        let mut world = World::new(1000);
        world.update(900);
        assert_eq!(world.time.delta, 0);
        assert_eq!(world.time.elapsed, 0);
        assert_eq!(world.turn, 1);
    }

    #[test]
    fn snapshot_carries_world() {
        let mut world = World::new(5);
        world.update(10);
        let snapshot = world.to_snapshot().unwrap();
        assert_eq!(World::from_snapshot(&snapshot).unwrap(), world);
    }

    #[test]
    fn adopt_continues_the_received_world() {
        let mut host = World::new(0);
        host.update(100);
        host.update(250);

        let mut peer = World::new(40);
        peer.adopt(&host.to_snapshot().unwrap()).unwrap();
        peer.update(300);
        assert_eq!(peer.turn, 3);
        assert_eq!(peer.time, WorldTime { delta: 50, elapsed: 300, then: 300 });
    }

    #[test]
    fn adopt_keeps_local_world_until_one_is_published() {
        let mut world = World::new(7);
        world.update(9);
        world.adopt(&WorldSnapshot::new(Vec::new())).unwrap();
        assert_eq!(world.turn, 1);

        assert!(world.adopt(&WorldSnapshot::new(vec![0xff])).is_err());
        assert_eq!(world.turn, 1);
    }

    proptest! {
        #[test]
        fn prop_elapsed_is_span_of_monotonic_clock(
            steps in prop::collection::vec(0u64..1000, 0..32),
        ) {
            let start = 10_000;
            let mut world = World::new(start);
            let mut now = start;
            for step in &steps {
                now += step;
                world.update(now);
            }
            prop_assert_eq!(world.time.elapsed, now - start);
            prop_assert_eq!(world.turn, steps.len() as u64);
        }
    }
}
