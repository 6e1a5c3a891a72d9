//! Connection Lifecycle Manager
//!
//! Owns the local [`Session`] and every peer [`Channel`], and drives the
//! open/close/timeout state machine for each of them.
//!
//! ## Responsibilities
//!
//! - Session: register with the rendezvous service under a deadline
//! - Hosting: accept inbound channels, ignoring duplicates per remote
//! - Joining: initiate outbound channels, idempotent per remote
//! - Faults: classify timeouts and disconnections into the fault log
//!
//! ## Design
//!
//! - Sans-IO: every operation returns [`ManagerAction`]s; the runtime performs
//!   the I/O and feeds results back as [`ManagerEvent`]s
//! - Single dispatch: [`ConnectionManager::handle`] is the only entry point
//!   for transport events, [`ConnectionManager::tick`] the only one for timers
//! - One deadline primitive: registration, accept and connect all settle
//!   through [`Deadline`]

use std::{collections::BTreeMap, time::Duration};

use tether_proto::PeerAddress;

use crate::{
    channel::{Channel, ChannelId, ChannelRole, ChannelState, Session, SessionStatus},
    deadline::{Deadline, Settlement},
    env::Environment,
    error::ConnectionError,
    fault::{FaultKind, FaultLog, NetworkFault},
};

/// Default window for registration and channel confirmation.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_millis(3000);

/// Timeouts for the lifecycle manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Window for the rendezvous service to acknowledge registration.
    pub signaling_timeout: Duration,
    /// Window for the transport to confirm a channel.
    pub connection_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            signaling_timeout: DEFAULT_CONNECTION_TIMEOUT,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
        }
    }
}

/// Transport events fed into the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    /// The rendezvous service acknowledged registration.
    SignalingOpened {
        /// Address assigned to us.
        address: PeerAddress,
    },

    /// The rendezvous link closed.
    SignalingClosed,

    /// A remote dialed us. The runtime allocated `channel` with
    /// [`ConnectionManager::next_channel_id`].
    IncomingChannel {
        /// Handle for the inbound attempt.
        channel: ChannelId,
        /// Remote's self-reported address.
        remote: PeerAddress,
    },

    /// The transport confirmed a channel is ready.
    ChannelOpened {
        /// Channel that opened.
        channel: ChannelId,
    },

    /// The transport reported a channel closed (either side).
    ChannelClosed {
        /// Channel that closed.
        channel: ChannelId,
    },
}

/// Actions for the runtime to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerAction {
    /// Open a link to the rendezvous service and register.
    Register,

    /// Tear the rendezvous link down.
    DestroySignaling,

    /// Start accepting inbound channels.
    Listen,

    /// Dial `remote` and identify ourselves on `channel`.
    Connect {
        /// Handle to use for the new channel.
        channel: ChannelId,
        /// Address to dial.
        remote: PeerAddress,
    },

    /// Complete the handshake of an inbound attempt.
    Accept {
        /// Inbound attempt to confirm.
        channel: ChannelId,
    },

    /// Close a channel (open or still opening).
    CloseChannel {
        /// Channel to close.
        channel: ChannelId,
    },

    /// A channel entered the connection set.
    ChannelReady(Channel),

    /// A channel left the connection set.
    ChannelRemoved(Channel),

    /// A pending `open_session` settled.
    SessionResolved(Result<PeerAddress, ConnectionError>),

    /// A pending `connect_to_peer` settled.
    ConnectResolved {
        /// Channel handle returned when the connect was issued.
        channel: ChannelId,
        /// The open channel, or why it failed.
        result: Result<Channel, ConnectionError>,
    },

    /// A fault was appended to the log.
    FaultRecorded(NetworkFault),
}

/// Immediate outcome of [`ConnectionManager::connect_to_peer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Already connected; nothing was dialed.
    Existing(Channel),
    /// Dial in flight; resolution arrives as [`ManagerAction::ConnectResolved`].
    Pending(ChannelId),
}

/// Attempt waiting for transport confirmation.
#[derive(Debug)]
struct PendingChannel<I> {
    channel: Channel,
    deadline: Deadline<I>,
}

/// Connection lifecycle state machine.
///
/// # Invariants
///
/// - At most one channel per remote across `pending` and `connections`
/// - Every entry of `connections` is [`ChannelState::Open`]
/// - Every deadline settles exactly once, producing at most one fault
pub struct ConnectionManager<E: Environment> {
    env: E,
    config: ManagerConfig,
    session: Session,
    signaling: Option<Deadline<E::Instant>>,
    hosting: bool,
    pending: BTreeMap<ChannelId, PendingChannel<E::Instant>>,
    connections: Vec<Channel>,
    incoming: Option<Channel>,
    faults: FaultLog,
    next_channel: u64,
}

impl<E: Environment> ConnectionManager<E> {
    /// Create a manager with no session.
    pub fn new(env: E, config: ManagerConfig) -> Self {
        Self {
            env,
            config,
            session: Session::closed(),
            signaling: None,
            hosting: false,
            pending: BTreeMap::new(),
            connections: Vec::new(),
            incoming: None,
            faults: FaultLog::new(),
            next_channel: 1,
        }
    }

    /// Current session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Address assigned by the rendezvous service.
    pub fn local_address(&self) -> Option<&PeerAddress> {
        self.session.address.as_ref()
    }

    /// True after `become_host` until the session closes.
    pub fn is_hosting(&self) -> bool {
        self.hosting
    }

    /// Open channels in insertion order.
    pub fn list_connections(&self) -> &[Channel] {
        &self.connections
    }

    /// Open channel to `remote`, if any.
    pub fn connection_to(&self, remote: &PeerAddress) -> Option<&Channel> {
        self.connections.iter().find(|c| &c.remote == remote)
    }

    /// Open channel with handle `id`, if any.
    pub fn connection(&self, id: ChannelId) -> Option<&Channel> {
        self.connections.iter().find(|c| c.id == id)
    }

    /// Number of attempts still waiting for confirmation.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Recorded faults.
    pub fn faults(&self) -> &FaultLog {
        &self.faults
    }

    /// Consume the most recently accepted inbound channel.
    ///
    /// Each accepted channel is handed out once; a later acceptance replaces
    /// an unconsumed one.
    pub fn take_incoming_channel(&mut self) -> Option<Channel> {
        self.incoming.take()
    }

    /// Allocate a channel handle for an inbound attempt.
    pub fn next_channel_id(&mut self) -> ChannelId {
        let id = ChannelId(self.next_channel);
        self.next_channel += 1;
        id
    }

    /// Register with the rendezvous service.
    ///
    /// Resolution arrives as [`ManagerAction::SessionResolved`].
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError::SessionActive` if a session is already
    /// connecting or open.
    pub fn open_session(&mut self) -> Result<Vec<ManagerAction>, ConnectionError> {
        if self.session.status != SessionStatus::Closed {
            return Err(ConnectionError::SessionActive { status: self.session.status.as_str() });
        }

        self.session = Session { address: None, status: SessionStatus::Connecting };
        self.signaling = Some(Deadline::start(self.env.now(), self.config.signaling_timeout));

        tracing::debug!("registering with rendezvous service");
        Ok(vec![ManagerAction::Register])
    }

    /// Start accepting inbound channels. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError::NotConnected` unless the session is open.
    pub fn become_host(&mut self) -> Result<Vec<ManagerAction>, ConnectionError> {
        if !self.session.is_open() {
            return Err(ConnectionError::NotConnected);
        }

        if self.hosting {
            return Ok(Vec::new());
        }

        self.hosting = true;
        tracing::info!(address = ?self.session.address, "hosting");
        Ok(vec![ManagerAction::Listen])
    }

    /// Open a channel to `address`.
    ///
    /// Connecting to an address that is already connected (or already being
    /// dialed) changes nothing and records no fault.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError::NotConnected` unless the session is open,
    /// `ConnectionError::SelfConnect` for our own address.
    pub fn connect_to_peer(
        &mut self,
        address: PeerAddress,
    ) -> Result<(ConnectOutcome, Vec<ManagerAction>), ConnectionError> {
        if !self.session.is_open() {
            return Err(ConnectionError::NotConnected);
        }

        if self.session.address.as_ref() == Some(&address) {
            return Err(ConnectionError::SelfConnect { address });
        }

        if let Some(existing) = self.connection_to(&address) {
            return Ok((ConnectOutcome::Existing(existing.clone()), Vec::new()));
        }

        if let Some(id) = self.pending_to(&address) {
            return Ok((ConnectOutcome::Pending(id), Vec::new()));
        }

        let id = self.next_channel_id();
        let channel = Channel::opening(id, address.clone(), ChannelRole::Initiated);
        let deadline = Deadline::start(self.env.now(), self.config.connection_timeout);
        self.pending.insert(id, PendingChannel { channel, deadline });

        tracing::debug!(%id, remote = %address, "connecting");
        let actions = vec![ManagerAction::Connect { channel: id, remote: address }];
        Ok((ConnectOutcome::Pending(id), actions))
    }

    /// Tear everything down: cancel pending attempts without faults, close
    /// every channel, close the session.
    pub fn close_session(&mut self) -> Vec<ManagerAction> {
        let mut actions = Vec::new();

        if let Some(mut deadline) = self.signaling.take() {
            if deadline.is_pending() {
                deadline.cancel();
                actions.push(ManagerAction::SessionResolved(Err(ConnectionError::Cancelled)));
            }
        }

        for (id, mut pending) in std::mem::take(&mut self.pending) {
            pending.deadline.cancel();
            actions.push(ManagerAction::CloseChannel { channel: id });
            if pending.channel.role == ChannelRole::Initiated {
                actions.push(ManagerAction::ConnectResolved {
                    channel: id,
                    result: Err(ConnectionError::Cancelled),
                });
            }
        }

        for mut channel in std::mem::take(&mut self.connections) {
            channel.state = ChannelState::Closed;
            actions.push(ManagerAction::CloseChannel { channel: channel.id });
            actions.push(ManagerAction::ChannelRemoved(channel));
        }

        if self.session.status != SessionStatus::Closed {
            actions.push(ManagerAction::DestroySignaling);
        }

        self.incoming = None;
        self.hosting = false;
        self.session = Session::closed();

        tracing::info!("session closed");
        actions
    }

    /// Process a transport event.
    pub fn handle(&mut self, event: ManagerEvent) -> Vec<ManagerAction> {
        match event {
            ManagerEvent::SignalingOpened { address } => self.handle_signaling_opened(address),
            ManagerEvent::SignalingClosed => self.handle_signaling_closed(),
            ManagerEvent::IncomingChannel { channel, remote } => {
                self.handle_incoming(channel, remote)
            },
            ManagerEvent::ChannelOpened { channel } => self.handle_channel_opened(channel),
            ManagerEvent::ChannelClosed { channel } => self.handle_channel_closed(channel),
        }
    }

    /// Fire every deadline whose window has elapsed.
    pub fn tick(&mut self) -> Vec<ManagerAction> {
        let now = self.env.now();
        let mut actions = Vec::new();

        if let Some(deadline) = self.signaling.as_mut() {
            if deadline.expire(now) {
                self.signaling_timed_out(&mut actions);
            }
        }

        let expired: Vec<ChannelId> = self
            .pending
            .iter_mut()
            .filter_map(|(id, pending)| pending.deadline.expire(now).then_some(*id))
            .collect();

        for id in expired {
            if let Some(pending) = self.pending.remove(&id) {
                self.channel_failed(pending.channel, &mut actions);
            }
        }

        actions
    }

    fn handle_signaling_opened(&mut self, address: PeerAddress) -> Vec<ManagerAction> {
        let Some(deadline) = self.signaling.as_mut() else {
            // Acknowledgement for a registration we already gave up on.
            return vec![ManagerAction::DestroySignaling];
        };

        let mut actions = Vec::new();
        match deadline.confirm(self.env.now()) {
            Settlement::Confirmed => {
                self.signaling = None;
                self.session =
                    Session { address: Some(address.clone()), status: SessionStatus::Open };
                tracing::info!(%address, "session open");
                actions.push(ManagerAction::SessionResolved(Ok(address)));
            },
            Settlement::TimedOut => self.signaling_timed_out(&mut actions),
            Settlement::AlreadySettled => actions.push(ManagerAction::DestroySignaling),
        }
        actions
    }

    fn handle_signaling_closed(&mut self) -> Vec<ManagerAction> {
        if self.session.status != SessionStatus::Open {
            // Before acknowledgement the registration deadline reports the
            // failure; after teardown there is nothing left to close.
            return Vec::new();
        }

        self.session.status = SessionStatus::Closed;
        vec![self.record(NetworkFault::signaling(FaultKind::SignalingLost, self.env.unix_millis()))]
    }

    fn handle_incoming(&mut self, id: ChannelId, remote: PeerAddress) -> Vec<ManagerAction> {
        if !self.hosting {
            tracing::debug!(%id, %remote, "not hosting, refusing inbound channel");
            return vec![ManagerAction::CloseChannel { channel: id }];
        }

        if self.session.address.as_ref() == Some(&remote) {
            tracing::warn!(%id, %remote, "inbound channel claims our own address");
            return vec![ManagerAction::CloseChannel { channel: id }];
        }

        if self.connection_to(&remote).is_some() || self.pending_to(&remote).is_some() {
            tracing::debug!(%id, %remote, "duplicate inbound channel ignored");
            return vec![ManagerAction::CloseChannel { channel: id }];
        }

        if self.pending.contains_key(&id) || self.connection(id).is_some() {
            tracing::warn!(%id, "inbound channel reused a live handle");
            return Vec::new();
        }

        let channel = Channel::opening(id, remote, ChannelRole::Accepted);
        let deadline = Deadline::start(self.env.now(), self.config.connection_timeout);
        self.pending.insert(id, PendingChannel { channel, deadline });

        vec![ManagerAction::Accept { channel: id }]
    }

    fn handle_channel_opened(&mut self, id: ChannelId) -> Vec<ManagerAction> {
        let Some(mut pending) = self.pending.remove(&id) else {
            // Confirmation after timeout or teardown: never resurrect.
            if self.connection(id).is_none() {
                tracing::debug!(%id, "late confirmation, closing");
                return vec![ManagerAction::CloseChannel { channel: id }];
            }
            return Vec::new();
        };

        let mut actions = Vec::new();
        match pending.deadline.confirm(self.env.now()) {
            Settlement::Confirmed => {
                let mut channel = pending.channel;
                channel.state = ChannelState::Open;
                self.connections.push(channel.clone());

                tracing::info!(%id, remote = %channel.remote, role = ?channel.role, "channel open");
                match channel.role {
                    ChannelRole::Accepted => self.incoming = Some(channel.clone()),
                    ChannelRole::Initiated => actions.push(ManagerAction::ConnectResolved {
                        channel: id,
                        result: Ok(channel.clone()),
                    }),
                }
                actions.push(ManagerAction::ChannelReady(channel));
            },
            Settlement::TimedOut => self.channel_failed(pending.channel, &mut actions),
            Settlement::AlreadySettled => {
                actions.push(ManagerAction::CloseChannel { channel: id });
            },
        }
        actions
    }

    fn handle_channel_closed(&mut self, id: ChannelId) -> Vec<ManagerAction> {
        let mut actions = Vec::new();

        if let Some(mut pending) = self.pending.remove(&id) {
            // Closed before it ever opened: the attempt failed now rather than
            // at its deadline.
            pending.deadline.cancel();
            self.channel_failed(pending.channel, &mut actions);
            return actions;
        }

        let Some(index) = self.connections.iter().position(|c| c.id == id) else {
            return actions;
        };

        let mut channel = self.connections.remove(index);
        channel.state = ChannelState::Closed;
        if self.incoming.as_ref().is_some_and(|c| c.id == id) {
            self.incoming = None;
        }

        let kind = match channel.role {
            ChannelRole::Accepted => FaultKind::PeerConnectionLost,
            ChannelRole::Initiated => FaultKind::HostConnectionLost,
        };
        let fault = NetworkFault::peer(kind, channel.remote.clone(), self.env.unix_millis());
        actions.push(ManagerAction::ChannelRemoved(channel));
        actions.push(self.record(fault));
        actions
    }

    fn signaling_timed_out(&mut self, actions: &mut Vec<ManagerAction>) {
        self.signaling = None;
        self.session = Session::closed();
        actions.push(ManagerAction::DestroySignaling);
        actions.push(
            self.record(NetworkFault::signaling(
                FaultKind::SignalingTimeout,
                self.env.unix_millis(),
            )),
        );
        actions.push(ManagerAction::SessionResolved(Err(ConnectionError::SignalingTimeout)));
    }

    fn channel_failed(&mut self, channel: Channel, actions: &mut Vec<ManagerAction>) {
        let kind = match channel.role {
            ChannelRole::Accepted => FaultKind::PeerConnectFailed,
            ChannelRole::Initiated => FaultKind::HostConnectFailed,
        };

        actions.push(ManagerAction::CloseChannel { channel: channel.id });
        actions.push(
            self.record(NetworkFault::peer(kind, channel.remote.clone(), self.env.unix_millis())),
        );

        if channel.role == ChannelRole::Initiated {
            actions.push(ManagerAction::ConnectResolved {
                channel: channel.id,
                result: Err(ConnectionError::HostConnectFailed { address: channel.remote }),
            });
        }
    }

    fn record(&mut self, fault: NetworkFault) -> ManagerAction {
        self.faults.record(fault.clone());
        ManagerAction::FaultRecorded(fault)
    }

    fn pending_to(&self, remote: &PeerAddress) -> Option<ChannelId> {
        self.pending.iter().find(|(_, p)| &p.channel.remote == remote).map(|(id, _)| *id)
    }
}

impl<E: Environment> std::fmt::Debug for ConnectionManager<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("session", &self.session)
            .field("hosting", &self.hosting)
            .field("pending", &self.pending.len())
            .field("connections", &self.connections)
            .field("faults", &self.faults.len())
            .finish()
    }
}
