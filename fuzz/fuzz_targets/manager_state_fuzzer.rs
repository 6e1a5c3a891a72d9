//! Fuzz target for [`ConnectionManager`] lifecycle
//!
//! Drive the manager with arbitrary interleavings of commands, transport
//! events and clock jumps, including events for channels it never created
//! and confirmations that arrive after their deadline.
//!
//! # Invariants
//!
//! - Every listed connection is open and to a distinct remote
//! - A deferred connect settles exactly once
//! - A channel that failed or was removed never reappears
//! - The fault log only grows
//! - After `close_session` nothing is pending and nothing is connected
//! - NEVER panic on an unexpected event

#![no_main]

use std::{
    collections::HashSet,
    future::Future,
    ops::{Add, Sub},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tether_core::{
    ChannelId, ChannelState, ConnectionManager, Environment, ManagerAction, ManagerConfig,
    ManagerEvent, SessionStatus,
};
use tether_proto::PeerAddress;

/// Represents time as Duration since epoch 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct FuzzInstant(Duration);

impl Sub for FuzzInstant {
    type Output = Duration;

    fn sub(self, other: Self) -> Duration {
        self.0.saturating_sub(other.0)
    }
}

impl Add<Duration> for FuzzInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs)
    }
}

#[derive(Clone)]
struct FuzzEnv {
    millis: Arc<AtomicU64>,
}

impl Environment for FuzzEnv {
    type Instant = FuzzInstant;

    fn now(&self) -> FuzzInstant {
        FuzzInstant(Duration::from_millis(self.millis.load(Ordering::SeqCst)))
    }

    fn unix_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }

    fn sleep(&self, _duration: Duration) -> impl Future<Output = ()> + Send {
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        buffer.fill(0);
    }
}

#[derive(Debug, Clone, Arbitrary)]
enum ManagerInput {
    OpenSession,
    BecomeHost,
    Connect { remote: u8 },
    CloseSession,
    SignalingOpened { local: u8 },
    SignalingClosed,
    Incoming { remote: u8 },
    Opened { channel: u8 },
    Closed { channel: u8 },
    Advance { millis: u16 },
}

/// A small address space so collisions (duplicates, self-connects) are common.
fn address(index: u8) -> PeerAddress {
    PeerAddress::new(format!("P{}", index % 4))
}

/// Ids wrap so events often hit channels the manager actually knows.
fn channel_id(index: u8) -> ChannelId {
    ChannelId(u64::from(index % 16))
}

fuzz_target!(|inputs: Vec<ManagerInput>| {
    let env = FuzzEnv { millis: Arc::new(AtomicU64::new(0)) };
    let mut manager = ConnectionManager::new(env.clone(), ManagerConfig::default());

    let mut settled: HashSet<ChannelId> = HashSet::new();
    let mut dead: HashSet<ChannelId> = HashSet::new();
    let mut faults = 0;

    for input in inputs {
        let actions = match input {
            ManagerInput::OpenSession => manager.open_session().unwrap_or_default(),
            ManagerInput::BecomeHost => manager.become_host().unwrap_or_default(),
            ManagerInput::Connect { remote } => {
                manager.connect_to_peer(address(remote)).map(|(_, a)| a).unwrap_or_default()
            },
            ManagerInput::CloseSession => {
                let actions = manager.close_session();
                assert_eq!(manager.pending_count(), 0);
                assert!(manager.list_connections().is_empty());
                assert_eq!(manager.session().status, SessionStatus::Closed);
                actions
            },
            ManagerInput::SignalingOpened { local } => {
                manager.handle(ManagerEvent::SignalingOpened { address: address(local) })
            },
            ManagerInput::SignalingClosed => manager.handle(ManagerEvent::SignalingClosed),
            ManagerInput::Incoming { remote } => {
                let channel = manager.next_channel_id();
                manager.handle(ManagerEvent::IncomingChannel { channel, remote: address(remote) })
            },
            ManagerInput::Opened { channel } => {
                manager.handle(ManagerEvent::ChannelOpened { channel: channel_id(channel) })
            },
            ManagerInput::Closed { channel } => {
                manager.handle(ManagerEvent::ChannelClosed { channel: channel_id(channel) })
            },
            ManagerInput::Advance { millis } => {
                env.millis.fetch_add(u64::from(millis), Ordering::SeqCst);
                manager.tick()
            },
        };

        for action in actions {
            match action {
                ManagerAction::ConnectResolved { channel, result } => {
                    assert!(settled.insert(channel), "{channel} settled twice");
                    if result.is_err() {
                        dead.insert(channel);
                    }
                },
                ManagerAction::ChannelRemoved(channel) => {
                    dead.insert(channel.id);
                },
                _ => {},
            }
        }

        let mut remotes = HashSet::new();
        for channel in manager.list_connections() {
            assert_eq!(channel.state, ChannelState::Open);
            assert!(remotes.insert(channel.remote.clone()), "duplicate remote {}", channel.remote);
            assert!(!dead.contains(&channel.id), "{} resurrected", channel.id);
        }

        if manager.session().is_open() {
            assert!(manager.local_address().is_some());
        }

        assert!(manager.faults().len() >= faults);
        faults = manager.faults().len();
    }
});
