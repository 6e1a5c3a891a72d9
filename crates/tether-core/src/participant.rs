//! Participant: lifecycle manager, relay and store behind one dispatch.
//!
//! The runtime owns exactly one [`Participant`] per process and feeds it every
//! transport event, timer tick and user command from a single task. The
//! participant never blocks and never performs I/O; it returns
//! [`ParticipantAction`]s in the order they must be executed.

use bytes::Bytes;
use tether_proto::{Message, PeerAddress, Payload, WorldSnapshot};

use crate::{
    channel::{Channel, ChannelId, Session},
    env::Environment,
    error::ConnectionError,
    fault::FaultLog,
    manager::{ConnectOutcome, ConnectionManager, ManagerAction, ManagerConfig, ManagerEvent},
    relay::{RelayAction, RelayCoordinator, Role},
    store::{MemoryStore, WorldStore},
};

/// Inputs from the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantEvent {
    /// Lifecycle event from the transport.
    Transport(ManagerEvent),

    /// A frame body arrived on a channel.
    ChannelData {
        /// Channel it arrived on.
        channel: ChannelId,
        /// Encoded [`Payload`], without the length prefix.
        body: Bytes,
    },

    /// Timer tick; fires elapsed deadlines.
    Tick,
}

impl From<ManagerEvent> for ParticipantEvent {
    fn from(event: ManagerEvent) -> Self {
        Self::Transport(event)
    }
}

/// Outputs for the runtime, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantAction {
    /// Lifecycle action (transport work or a resolution/notification).
    Manager(ManagerAction),
    /// Relay output (sends and store notifications).
    Relay(RelayAction),
}

/// One participant in the session.
///
/// # Type Parameters
///
/// - `E`: Environment implementation for time/randomness
/// - `S`: World store, [`MemoryStore`] unless the runtime mirrors state
pub struct Participant<E: Environment, S: WorldStore = MemoryStore> {
    env: E,
    manager: ConnectionManager<E>,
    relay: RelayCoordinator,
    store: S,
    last_stamp: Option<u64>,
}

impl<E: Environment> Participant<E, MemoryStore> {
    /// Participant with an in-memory store.
    pub fn new(env: E, config: ManagerConfig) -> Self {
        Self::with_store(env, config, MemoryStore::new())
    }
}

impl<E: Environment, S: WorldStore> Participant<E, S> {
    /// Participant backed by `store`.
    pub fn with_store(env: E, config: ManagerConfig, store: S) -> Self {
        let manager = ConnectionManager::new(env.clone(), config);
        Self { env, manager, relay: RelayCoordinator::new(), store, last_stamp: None }
    }

    /// Lifecycle manager (read-only).
    pub fn manager(&self) -> &ConnectionManager<E> {
        &self.manager
    }

    /// World store (read-only).
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Current session.
    pub fn session(&self) -> &Session {
        self.manager.session()
    }

    /// Address assigned by the rendezvous service.
    pub fn local_address(&self) -> Option<&PeerAddress> {
        self.manager.local_address()
    }

    /// Open channels in insertion order.
    pub fn list_connections(&self) -> &[Channel] {
        self.manager.list_connections()
    }

    /// Recorded faults.
    pub fn faults(&self) -> &FaultLog {
        self.manager.faults()
    }

    /// Ordered message log.
    pub fn messages(&self) -> &[Message] {
        self.store.messages()
    }

    /// Current world snapshot.
    pub fn snapshot(&self) -> &WorldSnapshot {
        self.store.snapshot()
    }

    /// Relay role, once hosting or joined.
    pub fn role(&self) -> Option<Role> {
        self.relay.role()
    }

    /// Consume the most recently accepted inbound channel.
    ///
    /// Channel data is wired by id for every channel; this only tells the
    /// caller that a peer joined.
    pub fn take_incoming_channel(&mut self) -> Option<Channel> {
        self.manager.take_incoming_channel()
    }

    /// Allocate a channel handle for an inbound attempt.
    pub fn next_channel_id(&mut self) -> ChannelId {
        self.manager.next_channel_id()
    }

    /// Register with the rendezvous service.
    pub fn open_session(&mut self) -> Result<Vec<ParticipantAction>, ConnectionError> {
        let actions = self.manager.open_session()?;
        Ok(self.process(actions))
    }

    /// Start hosting.
    pub fn become_host(&mut self) -> Result<Vec<ParticipantAction>, ConnectionError> {
        let actions = self.manager.become_host()?;
        self.relay.assume(Role::Host);
        Ok(self.process(actions))
    }

    /// Join the participant at `address`.
    pub fn connect_to_peer(
        &mut self,
        address: PeerAddress,
    ) -> Result<(ConnectOutcome, Vec<ParticipantAction>), ConnectionError> {
        let (outcome, actions) = self.manager.connect_to_peer(address)?;
        Ok((outcome, self.process(actions)))
    }

    /// Log a local message stamped with the current wall clock and send it on.
    ///
    /// # Errors
    ///
    /// `EmptyMessage` for empty text, `NotConnected` until the rendezvous
    /// service has assigned an address. Losing the rendezvous afterwards does
    /// not block chat over channels that are still open. Nothing is logged or
    /// sent on error.
    ///
    /// Stamps never repeat: two submissions in the same millisecond get
    /// consecutive timestamps, so each one is a distinct message everywhere.
    pub fn submit_message(
        &mut self,
        text: &str,
    ) -> Result<Vec<ParticipantAction>, ConnectionError> {
        if text.is_empty() {
            return Err(ConnectionError::EmptyMessage);
        }

        let Some(origin) = self.manager.local_address().cloned() else {
            return Err(ConnectionError::NotConnected);
        };

        let now = self.env.unix_millis();
        let timestamp = match self.last_stamp {
            Some(last) if now <= last => last + 1,
            _ => now,
        };
        self.last_stamp = Some(timestamp);

        let message = Message::new(origin, timestamp, text);
        let actions =
            self.relay.submit(message, self.manager.list_connections(), &mut self.store);
        Ok(actions.into_iter().map(ParticipantAction::Relay).collect())
    }

    /// Replace the local snapshot and broadcast it to every open channel.
    pub fn update_snapshot(&mut self, snapshot: WorldSnapshot) -> Vec<ParticipantAction> {
        self.store.replace_snapshot(snapshot);
        self.relay
            .broadcast_snapshot(self.store.snapshot(), self.manager.list_connections())
            .into_iter()
            .map(ParticipantAction::Relay)
            .collect()
    }

    /// Tear the session down. Pending attempts are cancelled without faults.
    pub fn close_session(&mut self) -> Vec<ParticipantAction> {
        let actions = self.manager.close_session();
        self.relay.reset_role();
        self.process(actions)
    }

    /// Fire elapsed deadlines.
    pub fn tick(&mut self) -> Vec<ParticipantAction> {
        let actions = self.manager.tick();
        self.process(actions)
    }

    /// Process a runtime event.
    pub fn handle(&mut self, event: ParticipantEvent) -> Vec<ParticipantAction> {
        match event {
            ParticipantEvent::Transport(event) => {
                let actions = self.manager.handle(event);
                self.process(actions)
            },
            ParticipantEvent::ChannelData { channel, body } => self.handle_data(channel, &body),
            ParticipantEvent::Tick => self.tick(),
        }
    }

    fn handle_data(&mut self, id: ChannelId, body: &[u8]) -> Vec<ParticipantAction> {
        let Some(from) = self.manager.connection(id).cloned() else {
            tracing::debug!(%id, "data on unknown channel dropped");
            return Vec::new();
        };

        let payload = match tether_proto::decode_body::<Payload>(body) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(%id, remote = %from.remote, %error, "malformed payload ignored");
                return Vec::new();
            },
        };

        self.relay
            .dispatch(&from, payload, self.manager.list_connections(), &mut self.store)
            .into_iter()
            .map(ParticipantAction::Relay)
            .collect()
    }

    /// Wrap manager actions, reacting to the ones that touch the relay.
    fn process(&mut self, actions: Vec<ManagerAction>) -> Vec<ParticipantAction> {
        let mut out = Vec::with_capacity(actions.len());

        for action in actions {
            let connection_set_grew = match &action {
                ManagerAction::ConnectResolved { result: Ok(_), .. } => {
                    self.relay.assume(Role::Peer);
                    false
                },
                ManagerAction::ChannelReady(_) => true,
                _ => false,
            };

            out.push(ParticipantAction::Manager(action));

            if connection_set_grew {
                out.extend(
                    self.relay
                        .broadcast_snapshot(self.store.snapshot(), self.manager.list_connections())
                        .into_iter()
                        .map(ParticipantAction::Relay),
                );
            }
        }

        out
    }
}

impl<E: Environment, S: WorldStore> std::fmt::Debug for Participant<E, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Participant")
            .field("manager", &self.manager)
            .field("role", &self.relay.role())
            .field("messages", &self.store.messages().len())
            .finish_non_exhaustive()
    }
}
