//! Relay and sync coordinator.
//!
//! Decides which payloads go to which open channels:
//!
//! - Snapshots are broadcast to every open channel whenever they change. A
//!   received snapshot replaces the local one unless we are the host; the
//!   host is the authority for world state.
//! - Messages are appended to the ordered log. Only the host re-relays, to
//!   every open channel except the one it came from and the message origin.
//!   That yields a star topology without echo.
//! - A received message already seen (same origin, timestamp and text) is
//!   neither appended nor relayed again, which also stops loops in non-star
//!   meshes. Local submissions are never dropped.

use std::collections::HashSet;

use tether_proto::{Message, MessageKey, Payload, WorldSnapshot};

use crate::{
    channel::{Channel, ChannelId, ChannelRole},
    store::WorldStore,
};

/// Relay role of the local participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Accepts inbound channels and relays between them.
    Host,
    /// Joined a host; forwards local messages upstream only.
    Peer,
}

/// Output of the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayAction {
    /// Send `payload` on `channel`.
    Send {
        /// Destination channel.
        channel: ChannelId,
        /// Payload to send.
        payload: Payload,
    },

    /// A message entered the log at `index`.
    MessageLogged {
        /// Position in the ordered log.
        index: usize,
        /// The logged message.
        message: Message,
    },

    /// The local snapshot was replaced by a remote one.
    SnapshotReplaced(WorldSnapshot),
}

/// Message relay with duplicate suppression.
#[derive(Debug, Clone, Default)]
pub struct RelayCoordinator {
    role: Option<Role>,
    seen: HashSet<MessageKey>,
}

impl RelayCoordinator {
    /// Coordinator with no role yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current role, if hosting or joined.
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// Set the role. Hosting takes precedence over a later join.
    pub fn assume(&mut self, role: Role) {
        if self.role != Some(Role::Host) {
            self.role = Some(role);
        }
    }

    /// Forget the role (session closed). The seen set survives so a message
    /// is never logged twice in one process.
    pub fn reset_role(&mut self) {
        self.role = None;
    }

    /// Whether a message with this key was already logged.
    pub fn has_seen(&self, key: &MessageKey) -> bool {
        self.seen.contains(key)
    }

    /// Send `snapshot` to every open channel.
    pub fn broadcast_snapshot(
        &self,
        snapshot: &WorldSnapshot,
        connections: &[Channel],
    ) -> Vec<RelayAction> {
        connections
            .iter()
            .filter(|c| c.is_open())
            .map(|c| RelayAction::Send {
                channel: c.id,
                payload: Payload::Snapshot(snapshot.clone()),
            })
            .collect()
    }

    /// Log a locally submitted message and send it on.
    ///
    /// Local submissions are always logged and sent; only received copies
    /// are deduplicated. The key is still remembered so an echo of this
    /// message is dropped. The host (or a participant with no role)
    /// broadcasts to every open channel; a peer forwards to its upstream
    /// channels only.
    pub fn submit<S: WorldStore>(
        &mut self,
        message: Message,
        connections: &[Channel],
        store: &mut S,
    ) -> Vec<RelayAction> {
        self.seen.insert(message.key());
        let index = store.append_message(message.clone());
        let mut actions = vec![RelayAction::MessageLogged { index, message: message.clone() }];

        let upstream_only = self.role == Some(Role::Peer);
        actions.extend(
            connections
                .iter()
                .filter(|c| c.is_open())
                .filter(|c| !upstream_only || c.role == ChannelRole::Initiated)
                .map(|c| RelayAction::Send {
                    channel: c.id,
                    payload: Payload::Message(message.clone()),
                }),
        );
        actions
    }

    /// Apply a payload received on `from`.
    pub fn dispatch<S: WorldStore>(
        &mut self,
        from: &Channel,
        payload: Payload,
        connections: &[Channel],
        store: &mut S,
    ) -> Vec<RelayAction> {
        match payload {
            Payload::Message(message) => self.relay_message(from, message, connections, store),
            Payload::Snapshot(snapshot) => {
                if self.role == Some(Role::Host) {
                    tracing::debug!(channel = %from.id, "host ignores remote snapshot");
                    return Vec::new();
                }
                store.replace_snapshot(snapshot.clone());
                vec![RelayAction::SnapshotReplaced(snapshot)]
            },
        }
    }

    fn relay_message<S: WorldStore>(
        &mut self,
        from: &Channel,
        message: Message,
        connections: &[Channel],
        store: &mut S,
    ) -> Vec<RelayAction> {
        if !self.seen.insert(message.key()) {
            tracing::trace!(origin = %message.origin, ts = message.timestamp, "duplicate dropped");
            return Vec::new();
        }
        let index = store.append_message(message.clone());
        let mut actions = vec![RelayAction::MessageLogged { index, message: message.clone() }];

        if self.role != Some(Role::Host) {
            return actions;
        }

        actions.extend(
            connections
                .iter()
                .filter(|c| c.is_open() && c.remote != from.remote && c.remote != message.origin)
                .map(|c| RelayAction::Send {
                    channel: c.id,
                    payload: Payload::Message(message.clone()),
                }),
        );
        actions
    }
}

#[cfg(test)]
mod tests {
    use tether_proto::PeerAddress;

    use super::*;
    use crate::{channel::ChannelState, store::MemoryStore};

    fn open(id: u64, remote: &str, role: ChannelRole) -> Channel {
        let remote = PeerAddress::new(remote);
        Channel { id: ChannelId(id), remote, state: ChannelState::Open, role }
    }

    fn sends(actions: &[RelayAction]) -> Vec<ChannelId> {
        actions
            .iter()
            .filter_map(|a| match a {
                RelayAction::Send { channel, .. } => Some(*channel),
                _ => None,
            })
            .collect()
    }

    fn host_star() -> Vec<Channel> {
        vec![
            open(1, "A", ChannelRole::Accepted),
            open(2, "B", ChannelRole::Accepted),
            open(3, "C", ChannelRole::Accepted),
        ]
    }

    #[test]
    fn host_relays_to_everyone_but_sender() {
        let mut relay = RelayCoordinator::new();
        relay.assume(Role::Host);
        let mut store = MemoryStore::new();
        let connections = host_star();

        let message = Message::new("A".into(), 10, "hello");
        let actions =
            relay.dispatch(&connections[0], Payload::Message(message), &connections, &mut store);

        assert_eq!(sends(&actions), [ChannelId(2), ChannelId(3)]);
        assert_eq!(store.messages().len(), 1);
    }

    #[test]
    fn host_skips_origin_even_via_other_channel() {
        let mut relay = RelayCoordinator::new();
        relay.assume(Role::Host);
        let mut store = MemoryStore::new();
        let connections = host_star();

        // Authored by C, arrived through B.
        let message = Message::new("C".into(), 10, "hello");
        let actions =
            relay.dispatch(&connections[1], Payload::Message(message), &connections, &mut store);

        assert_eq!(sends(&actions), [ChannelId(1)]);
    }

    #[test]
    fn peer_appends_without_relaying() {
        let mut relay = RelayCoordinator::new();
        relay.assume(Role::Peer);
        let mut store = MemoryStore::new();
        let connections = vec![open(1, "H", ChannelRole::Initiated)];

        let message = Message::new("A".into(), 10, "hi");
        let actions =
            relay.dispatch(&connections[0], Payload::Message(message), &connections, &mut store);

        assert!(sends(&actions).is_empty());
        assert_eq!(store.messages().len(), 1);
    }

    #[test]
    fn duplicate_is_neither_logged_nor_relayed() {
        let mut relay = RelayCoordinator::new();
        relay.assume(Role::Host);
        let mut store = MemoryStore::new();
        let connections = host_star();
        let message = Message::new("A".into(), 10, "hi");

        let first = Payload::Message(message.clone());
        relay.dispatch(&connections[0], first, &connections, &mut store);
        let again =
            relay.dispatch(&connections[1], Payload::Message(message), &connections, &mut store);

        assert!(again.is_empty());
        assert_eq!(store.messages().len(), 1);
    }

    #[test]
    fn own_message_echo_is_dropped() {
        let mut relay = RelayCoordinator::new();
        relay.assume(Role::Peer);
        let mut store = MemoryStore::new();
        let connections = vec![open(1, "H", ChannelRole::Initiated)];

        let message = Message::new("P".into(), 10, "mine");
        let actions = relay.submit(message.clone(), &connections, &mut store);
        assert_eq!(sends(&actions), [ChannelId(1)]);
        assert!(relay.has_seen(&message.key()));

        let echo =
            relay.dispatch(&connections[0], Payload::Message(message), &connections, &mut store);
        assert!(echo.is_empty());
        assert_eq!(store.messages().len(), 1);
    }

    #[test]
    fn repeated_local_submission_is_still_sent() {
        let mut relay = RelayCoordinator::new();
        relay.assume(Role::Peer);
        let mut store = MemoryStore::new();
        let connections = vec![open(1, "H", ChannelRole::Initiated)];
        let message = Message::new("P".into(), 10, "ok");

        relay.submit(message.clone(), &connections, &mut store);
        let again = relay.submit(message, &connections, &mut store);

        assert_eq!(sends(&again), [ChannelId(1)]);
        assert_eq!(store.messages().len(), 2);
    }

    #[test]
    fn peer_submits_upstream_only() {
        let mut relay = RelayCoordinator::new();
        relay.assume(Role::Peer);
        let mut store = MemoryStore::new();
        let connections =
            vec![open(1, "H", ChannelRole::Initiated), open(2, "X", ChannelRole::Accepted)];

        let actions = relay.submit(Message::new("P".into(), 1, "up"), &connections, &mut store);
        assert_eq!(sends(&actions), [ChannelId(1)]);
    }

    #[test]
    fn host_ignores_remote_snapshot() {
        let mut relay = RelayCoordinator::new();
        relay.assume(Role::Host);
        let mut store = MemoryStore::with_snapshot(WorldSnapshot::new(vec![1]));
        let connections = host_star();

        let actions = relay.dispatch(
            &connections[0],
            Payload::Snapshot(WorldSnapshot::new(vec![9])),
            &connections,
            &mut store,
        );
        assert!(actions.is_empty());
        assert_eq!(store.snapshot().data().as_ref(), [1]);
    }

    #[test]
    fn peer_replaces_snapshot() {
        let mut relay = RelayCoordinator::new();
        relay.assume(Role::Peer);
        let mut store = MemoryStore::new();
        let connections = vec![open(1, "H", ChannelRole::Initiated)];
        let snapshot = WorldSnapshot::new(vec![7]);

        let actions = relay.dispatch(
            &connections[0],
            Payload::Snapshot(snapshot.clone()),
            &connections,
            &mut store,
        );
        assert_eq!(actions, vec![RelayAction::SnapshotReplaced(snapshot.clone())]);
        assert_eq!(store.snapshot(), &snapshot);
    }

    #[test]
    fn broadcast_skips_closed_channels() {
        let relay = RelayCoordinator::new();
        let mut connections = host_star();
        connections[1].state = ChannelState::Closed;

        let actions = relay.broadcast_snapshot(&WorldSnapshot::new(vec![1]), &connections);
        assert_eq!(sends(&actions), [ChannelId(1), ChannelId(3)]);
    }

    #[test]
    fn host_role_is_sticky() {
        let mut relay = RelayCoordinator::new();
        relay.assume(Role::Host);
        relay.assume(Role::Peer);
        assert_eq!(relay.role(), Some(Role::Host));

        relay.reset_role();
        relay.assume(Role::Peer);
        assert_eq!(relay.role(), Some(Role::Peer));
    }
}
