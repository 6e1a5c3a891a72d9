//! Participant tests

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use tether_core::{
    ChannelId, ConnectOutcome, ConnectionError, ManagerAction, ManagerConfig, ManagerEvent,
    Participant, ParticipantAction, ParticipantEvent, RelayAction, Role,
};
use tether_proto::{Payload, PeerAddress, WorldSnapshot, encode_frame};

// Test environment with a hand-driven clock
#[derive(Clone)]
struct TestEnv {
    origin: Instant,
    millis: Arc<AtomicU64>,
}

impl TestEnv {
    fn new() -> Self {
        Self { origin: Instant::now(), millis: Arc::new(AtomicU64::new(0)) }
    }

    fn advance(&self, ms: u64) {
        self.millis.fetch_add(ms, Ordering::SeqCst);
    }
}

impl tether_core::Environment for TestEnv {
    type Instant = Instant;

    fn now(&self) -> Self::Instant {
        self.origin + Duration::from_millis(self.millis.load(Ordering::SeqCst))
    }

    fn unix_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        async move {
            tokio::time::sleep(duration).await;
        }
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        buffer.fill(7);
    }
}

fn body(payload: &Payload) -> Bytes {
    // Strip the length prefix; channel data events carry bodies only.
    encode_frame(payload).unwrap().slice(tether_proto::HEADER_LEN..)
}

fn sends(actions: &[ParticipantAction]) -> Vec<(ChannelId, Payload)> {
    actions
        .iter()
        .filter_map(|a| match a {
            ParticipantAction::Relay(RelayAction::Send { channel, payload }) => {
                Some((*channel, payload.clone()))
            },
            _ => None,
        })
        .collect()
}

fn open(env: &TestEnv, address: &str) -> Participant<TestEnv> {
    let mut participant = Participant::new(env.clone(), ManagerConfig::default());
    participant.open_session().unwrap();
    participant.handle(ManagerEvent::SignalingOpened { address: address.into() }.into());
    participant
}

fn accept(
    participant: &mut Participant<TestEnv>,
    remote: &str,
) -> (ChannelId, Vec<ParticipantAction>) {
    let id = participant.next_channel_id();
    participant
        .handle(ManagerEvent::IncomingChannel { channel: id, remote: remote.into() }.into());
    let actions = participant.handle(ManagerEvent::ChannelOpened { channel: id }.into());
    (id, actions)
}

#[test]
fn submit_requires_open_session() {
    let env = TestEnv::new();
    let mut participant = Participant::new(env, ManagerConfig::default());

    assert_eq!(participant.submit_message("hi"), Err(ConnectionError::NotConnected));
    participant.open_session().unwrap();
    assert_eq!(participant.submit_message("hi"), Err(ConnectionError::NotConnected));
    assert!(participant.messages().is_empty());
}

#[test]
fn chat_survives_losing_the_rendezvous() {
    let env = TestEnv::new();
    let mut host = open(&env, "H1");
    host.become_host().unwrap();
    let (id, _) = accept(&mut host, "P1");

    host.handle(ManagerEvent::SignalingClosed.into());
    assert!(!host.session().is_open());
    assert_eq!(host.list_connections().len(), 1);

    let actions = host.submit_message("still here?").unwrap();
    assert_eq!(sends(&actions), [(id, Payload::message("H1", 0, "still here?"))]);
    assert_eq!(host.messages().len(), 1);
}

#[test]
fn submit_after_close_is_not_connected() {
    let env = TestEnv::new();
    let mut host = open(&env, "H1");
    host.close_session();
    assert_eq!(host.submit_message("hi"), Err(ConnectionError::NotConnected));
}

#[test]
fn same_millisecond_submissions_are_distinct() {
    let env = TestEnv::new();
    env.advance(500);
    let mut peer = open(&env, "P1");
    let (ConnectOutcome::Pending(id), _) = peer.connect_to_peer("H1".into()).unwrap() else {
        panic!("expected pending connect");
    };
    peer.handle(ManagerEvent::ChannelOpened { channel: id }.into());

    let first = peer.submit_message("ok").unwrap();
    let second = peer.submit_message("ok").unwrap();

    assert_eq!(sends(&first), [(id, Payload::message("P1", 500, "ok"))]);
    assert_eq!(sends(&second), [(id, Payload::message("P1", 501, "ok"))]);
    let stamps: Vec<u64> = peer.messages().iter().map(|m| m.timestamp).collect();
    assert_eq!(stamps, [500, 501]);

    // The wall clock catching up does not reuse a stamp.
    env.advance(1);
    peer.submit_message("ok").unwrap();
    assert_eq!(peer.messages()[2].timestamp, 502);
}

#[test]
fn empty_message_is_rejected() {
    let env = TestEnv::new();
    let mut participant = open(&env, "H1");
    assert_eq!(participant.submit_message(""), Err(ConnectionError::EmptyMessage));
    assert!(participant.messages().is_empty());
}

#[test]
fn submitted_message_is_stamped_and_logged() {
    let env = TestEnv::new();
    env.advance(1234);
    let mut participant = open(&env, "H1");

    participant.submit_message("hello").unwrap();
    let logged = &participant.messages()[0];
    assert_eq!(logged.origin, PeerAddress::new("H1"));
    assert_eq!(logged.timestamp, 1234);
    assert_eq!(logged.text, "hello");
}

#[test]
fn host_broadcasts_snapshot_when_a_peer_joins() {
    let env = TestEnv::new();
    let mut host = open(&env, "H1");
    host.become_host().unwrap();
    assert_eq!(host.role(), Some(Role::Host));
    host.update_snapshot(WorldSnapshot::new(vec![1, 2, 3]));

    let (first, actions) = accept(&mut host, "P1");
    assert_eq!(sends(&actions), [(first, Payload::Snapshot(WorldSnapshot::new(vec![1, 2, 3])))]);

    // A second join re-broadcasts to the whole set.
    let (second, actions) = accept(&mut host, "P2");
    let targets: Vec<ChannelId> = sends(&actions).into_iter().map(|(c, _)| c).collect();
    assert_eq!(targets, [first, second]);
}

#[test]
fn update_snapshot_reaches_every_connection() {
    let env = TestEnv::new();
    let mut host = open(&env, "H1");
    host.become_host().unwrap();
    let (a, _) = accept(&mut host, "P1");
    let (b, _) = accept(&mut host, "P2");

    let actions = host.update_snapshot(WorldSnapshot::new(vec![9]));
    let targets: Vec<ChannelId> = sends(&actions).into_iter().map(|(c, _)| c).collect();
    assert_eq!(targets, [a, b]);
    assert_eq!(host.snapshot().data().as_ref(), [9]);
}

#[test]
fn out_of_order_arrivals_are_sorted() {
    let env = TestEnv::new();
    let mut peer = open(&env, "P1");
    let (ConnectOutcome::Pending(id), _) = peer.connect_to_peer("H1".into()).unwrap() else {
        panic!("expected pending connect");
    };
    peer.handle(ManagerEvent::ChannelOpened { channel: id }.into());
    assert_eq!(peer.role(), Some(Role::Peer));

    for (stamp, text) in [(100, "late"), (50, "early")] {
        let payload = Payload::message("H1", stamp, text);
        peer.handle(ParticipantEvent::ChannelData { channel: id, body: body(&payload) });
    }

    let stamps: Vec<u64> = peer.messages().iter().map(|m| m.timestamp).collect();
    assert_eq!(stamps, [50, 100]);
}

#[test]
fn malformed_payload_is_ignored() {
    let env = TestEnv::new();
    let mut host = open(&env, "H1");
    host.become_host().unwrap();
    let (id, _) = accept(&mut host, "P1");

    let actions = host.handle(ParticipantEvent::ChannelData {
        channel: id,
        body: Bytes::from_static(&[0xff, 0x00, 0x13]),
    });
    assert!(actions.is_empty());
    assert!(host.messages().is_empty());
    assert_eq!(host.list_connections().len(), 1);
    assert!(host.faults().is_empty());
}

#[test]
fn data_on_unknown_channel_is_dropped() {
    let env = TestEnv::new();
    let mut host = open(&env, "H1");
    let payload = Payload::message("X", 1, "ghost");

    let actions =
        host.handle(ParticipantEvent::ChannelData { channel: ChannelId(99), body: body(&payload) });
    assert!(actions.is_empty());
    assert!(host.messages().is_empty());
}

#[test]
fn tick_event_fires_deadlines() {
    let env = TestEnv::new();
    let mut participant = Participant::new(env.clone(), ManagerConfig::default());
    participant.open_session().unwrap();

    env.advance(3000);
    let actions = participant.handle(ParticipantEvent::Tick);
    assert!(actions.contains(&ParticipantAction::Manager(ManagerAction::SessionResolved(Err(
        ConnectionError::SignalingTimeout
    )))));
}

#[test]
fn close_session_drops_role() {
    let env = TestEnv::new();
    let mut host = open(&env, "H1");
    host.become_host().unwrap();
    accept(&mut host, "P1");

    let actions = host.close_session();
    assert!(actions.iter().any(|a| matches!(
        a,
        ParticipantAction::Manager(ManagerAction::CloseChannel { .. })
    )));
    assert_eq!(host.role(), None);
    assert!(host.list_connections().is_empty());
    assert!(host.faults().is_empty());
}
