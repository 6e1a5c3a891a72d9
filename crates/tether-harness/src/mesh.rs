//! Sans-IO simulation mesh.
//!
//! A [`SimMesh`] owns N participants on one [`ManualEnv`] clock and plays the
//! part of the rendezvous service and the transport: every action a
//! participant emits is turned into events for itself or its counterpart and
//! pushed on a FIFO queue. [`SimMesh::run_until_idle`] drains the queue, so a
//! test controls exactly when time passes and what the network does.
//!
//! # Fault Injection
//!
//! - Dropped registration: the rendezvous never acknowledges a node
//! - Stalled accept: a node's transport never confirms accepted channels
//! - Severed link: both ends of a channel see it close

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use bytes::Bytes;
use tether_core::{
    Channel, ChannelId, ConnectOutcome, ConnectionError, ManagerAction, ManagerConfig,
    ManagerEvent, Participant, ParticipantAction, ParticipantEvent, RelayAction,
};
use tether_proto::{HEADER_LEN, Payload, PeerAddress, WorldSnapshot, encode_frame};

use crate::manual_env::ManualEnv;

/// Index of a node in the mesh.
pub type NodeId = usize;

/// Upper bound on queue drains per call, guarding against relay storms.
const MAX_DELIVERIES: usize = 100_000;

/// A settled deferred operation, recorded in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// `open_session` settled.
    Session {
        /// Node whose session settled.
        node: NodeId,
        /// Assigned address or failure.
        result: Result<PeerAddress, ConnectionError>,
    },
    /// `connect_to_peer` settled.
    Connect {
        /// Initiating node.
        node: NodeId,
        /// Channel handle returned at connect time.
        channel: ChannelId,
        /// Open channel or failure.
        result: Result<Channel, ConnectionError>,
    },
}

/// One simulated participant.
pub struct MeshNode {
    /// Address the rendezvous assigns on registration.
    pub name: PeerAddress,
    /// The participant under test.
    pub participant: Participant<ManualEnv>,
}

/// Deterministic multi-participant world.
pub struct SimMesh {
    env: ManualEnv,
    nodes: Vec<MeshNode>,
    registry: BTreeMap<PeerAddress, NodeId>,
    /// Both directions of every paired channel.
    links: BTreeMap<(NodeId, ChannelId), (NodeId, ChannelId)>,
    queue: VecDeque<(NodeId, ParticipantEvent)>,

    drop_registration: BTreeSet<NodeId>,
    stall_accept: BTreeSet<NodeId>,

    resolutions: Vec<Resolution>,
    echoes: usize,
}

impl SimMesh {
    /// Mesh of nodes registering under `names`, with default timeouts.
    pub fn new(names: &[&str]) -> Self {
        Self::with_config(names, ManagerConfig::default(), 0)
    }

    /// Mesh with explicit timeouts and RNG seed.
    pub fn with_config(names: &[&str], config: ManagerConfig, seed: u64) -> Self {
        let env = ManualEnv::starting_at(seed, 0);
        let nodes = names
            .iter()
            .map(|name| MeshNode {
                name: PeerAddress::new(*name),
                participant: Participant::new(env.clone(), config),
            })
            .collect();

        Self {
            env,
            nodes,
            registry: BTreeMap::new(),
            links: BTreeMap::new(),
            queue: VecDeque::new(),
            drop_registration: BTreeSet::new(),
            stall_accept: BTreeSet::new(),
            resolutions: Vec::new(),
            echoes: 0,
        }
    }

    /// Shared clock.
    pub fn env(&self) -> &ManualEnv {
        &self.env
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True for a mesh without nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Participant of `node`.
    pub fn participant(&self, node: NodeId) -> &Participant<ManualEnv> {
        &self.nodes[node].participant
    }

    /// Registration name of `node`.
    pub fn name(&self, node: NodeId) -> &PeerAddress {
        &self.nodes[node].name
    }

    /// Deferred resolutions in the order they happened.
    pub fn resolutions(&self) -> &[Resolution] {
        &self.resolutions
    }

    /// Messages delivered back to the participant that authored them.
    pub fn echoes(&self) -> usize {
        self.echoes
    }

    /// Never acknowledge `node`'s registrations.
    pub fn drop_registration(&mut self, node: NodeId) {
        self.drop_registration.insert(node);
    }

    /// Never confirm channels `node` accepts.
    pub fn stall_accept(&mut self, node: NodeId) {
        self.stall_accept.insert(node);
    }

    /// Remove every injected fault.
    pub fn heal(&mut self) {
        self.drop_registration.clear();
        self.stall_accept.clear();
    }

    /// `open_session` on `node`.
    pub fn open_session(&mut self, node: NodeId) -> Result<(), ConnectionError> {
        let actions = self.nodes[node].participant.open_session()?;
        self.route(node, actions);
        Ok(())
    }

    /// `become_host` on `node`.
    pub fn become_host(&mut self, node: NodeId) -> Result<(), ConnectionError> {
        let actions = self.nodes[node].participant.become_host()?;
        self.route(node, actions);
        Ok(())
    }

    /// `connect_to_peer` from `node` to `target`'s registration name.
    pub fn connect(
        &mut self,
        node: NodeId,
        target: NodeId,
    ) -> Result<ConnectOutcome, ConnectionError> {
        let address = self.nodes[target].name.clone();
        let (outcome, actions) = self.nodes[node].participant.connect_to_peer(address)?;
        self.route(node, actions);
        Ok(outcome)
    }

    /// `submit_message` on `node`.
    pub fn submit(&mut self, node: NodeId, text: &str) -> Result<(), ConnectionError> {
        let actions = self.nodes[node].participant.submit_message(text)?;
        self.route(node, actions);
        Ok(())
    }

    /// `update_snapshot` on `node`.
    pub fn update_snapshot(&mut self, node: NodeId, snapshot: WorldSnapshot) {
        let actions = self.nodes[node].participant.update_snapshot(snapshot);
        self.route(node, actions);
    }

    /// `close_session` on `node`.
    pub fn close_session(&mut self, node: NodeId) {
        let actions = self.nodes[node].participant.close_session();
        self.route(node, actions);
    }

    /// Deliver `payload` to `to` as if `from` had sent it over their channel.
    ///
    /// Returns false when the two are not linked.
    pub fn inject(&mut self, from: NodeId, to: NodeId, payload: &Payload) -> bool {
        let Some(channel) = self.channel_between(to, from) else {
            return false;
        };
        match encode_body(payload) {
            Some(body) => {
                self.queue.push_back((to, ParticipantEvent::ChannelData { channel, body }));
                true
            },
            None => false,
        }
    }

    /// Close every channel between `a` and `b` at the transport level.
    pub fn sever(&mut self, a: NodeId, b: NodeId) {
        let ends: Vec<_> = self
            .links
            .iter()
            .filter(|((node, _), (peer, _))| *node == a && *peer == b)
            .map(|(near, far)| (*near, *far))
            .collect();

        for ((near_node, near), (far_node, far)) in ends {
            self.links.remove(&(near_node, near));
            self.links.remove(&(far_node, far));
            self.queue.push_back((near_node, ManagerEvent::ChannelClosed { channel: near }.into()));
            self.queue.push_back((far_node, ManagerEvent::ChannelClosed { channel: far }.into()));
        }
    }

    /// Advance the clock, tick every node, and drain the queue.
    pub fn advance(&mut self, duration: std::time::Duration) {
        self.env.advance(duration);
        for node in 0..self.nodes.len() {
            let actions = self.nodes[node].participant.tick();
            self.route(node, actions);
        }
        self.run_until_idle();
    }

    /// Deliver queued events until none remain. Returns how many were delivered.
    pub fn run_until_idle(&mut self) -> usize {
        let mut delivered = 0;
        while let Some((node, event)) = self.queue.pop_front() {
            if let ParticipantEvent::ChannelData { body, .. } = &event {
                self.count_echo(node, body);
            }

            let actions = self.nodes[node].participant.handle(event);
            self.route(node, actions);

            delivered += 1;
            if delivered >= MAX_DELIVERIES {
                tracing::warn!(delivered, "delivery bound reached, queue abandoned");
                self.queue.clear();
                break;
            }
        }
        delivered
    }

    /// Channel on `node` whose transport counterpart lives on `peer`.
    pub fn channel_between(&self, node: NodeId, peer: NodeId) -> Option<ChannelId> {
        self.links
            .iter()
            .find(|((n, _), (p, _))| *n == node && *p == peer)
            .map(|((_, channel), _)| *channel)
    }

    fn count_echo(&mut self, node: NodeId, body: &Bytes) {
        if let Ok(Payload::Message(message)) = tether_proto::decode_body::<Payload>(body) {
            if message.origin == self.nodes[node].name {
                self.echoes += 1;
            }
        }
    }

    fn route(&mut self, node: NodeId, actions: Vec<ParticipantAction>) {
        for action in actions {
            match action {
                ParticipantAction::Manager(action) => self.route_manager(node, action),
                ParticipantAction::Relay(RelayAction::Send { channel, payload }) => {
                    let Some(&(peer, far)) = self.links.get(&(node, channel)) else {
                        continue;
                    };
                    if let Some(body) = encode_body(&payload) {
                        let data = ParticipantEvent::ChannelData { channel: far, body };
                        self.queue.push_back((peer, data));
                    }
                },
                ParticipantAction::Relay(_) => {},
            }
        }
    }

    fn route_manager(&mut self, node: NodeId, action: ManagerAction) {
        match action {
            ManagerAction::Register => {
                if self.drop_registration.contains(&node) {
                    return;
                }
                let address = self.nodes[node].name.clone();
                self.registry.insert(address.clone(), node);
                self.queue.push_back((node, ManagerEvent::SignalingOpened { address }.into()));
            },
            ManagerAction::DestroySignaling => {
                self.registry.retain(|_, registered| *registered != node);
            },
            ManagerAction::Connect { channel, remote } => {
                let Some(&target) = self.registry.get(&remote) else {
                    self.queue.push_back((node, ManagerEvent::ChannelClosed { channel }.into()));
                    return;
                };
                let inbound = self.nodes[target].participant.next_channel_id();
                self.links.insert((node, channel), (target, inbound));
                self.links.insert((target, inbound), (node, channel));

                let remote = self.nodes[node].name.clone();
                self.queue.push_back((
                    target,
                    ManagerEvent::IncomingChannel { channel: inbound, remote }.into(),
                ));
            },
            ManagerAction::Accept { channel } => {
                if self.stall_accept.contains(&node) {
                    return;
                }
                let Some(&(peer, far)) = self.links.get(&(node, channel)) else {
                    return;
                };
                self.queue.push_back((node, ManagerEvent::ChannelOpened { channel }.into()));
                self.queue.push_back((peer, ManagerEvent::ChannelOpened { channel: far }.into()));
            },
            ManagerAction::CloseChannel { channel } => {
                if let Some((peer, far)) = self.links.remove(&(node, channel)) {
                    self.links.remove(&(peer, far));
                    let closed = ManagerEvent::ChannelClosed { channel: far };
                    self.queue.push_back((peer, closed.into()));
                }
            },
            ManagerAction::SessionResolved(result) => {
                self.resolutions.push(Resolution::Session { node, result });
            },
            ManagerAction::ConnectResolved { channel, result } => {
                self.resolutions.push(Resolution::Connect { node, channel, result });
            },
            ManagerAction::Listen
            | ManagerAction::ChannelReady(_)
            | ManagerAction::ChannelRemoved(_)
            | ManagerAction::FaultRecorded(_) => {},
        }
    }
}

impl std::fmt::Debug for SimMesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimMesh")
            .field("nodes", &self.nodes.iter().map(|n| &n.name).collect::<Vec<_>>())
            .field("links", &(self.links.len() / 2))
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

/// Frame body of `payload`, as the transport would hand it over.
fn encode_body(payload: &Payload) -> Option<Bytes> {
    match encode_frame(payload) {
        Ok(frame) => Some(frame.slice(HEADER_LEN..)),
        Err(e) => {
            tracing::warn!(error = %e, "payload not encodable");
            None
        },
    }
}
