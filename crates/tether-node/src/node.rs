//! Participant runtime.
//!
//! One task owns the [`Participant`] and runs a single event loop over three
//! sources: the deadline ticker, I/O events posted by per-connection tasks,
//! and commands from [`NodeHandle`]s. Socket work happens in spawned tasks
//! that only post events back, so the state machine is never touched
//! concurrently.
//!
//! ```text
//!  NodeHandle ──commands──►┐
//!  ticker ─────────────────┤   Node::run ──actions──► signaling / channel tasks
//!  I/O tasks ───events────►┘        │
//!                                   └──notices──► subscribers
//! ```

use std::{collections::HashMap, net::SocketAddr};

use bytes::Bytes;
use tether_core::{
    Channel, ChannelId, ConnectOutcome, ConnectionError, Environment, Listener, ManagerAction,
    ManagerEvent, NetworkFault, Participant, ParticipantAction, ParticipantEvent, RelayAction,
    Role, Session, Transport, TransportError, read_frame, read_frame_bytes, write_frame,
};
use tether_proto::{Handshake, Message, PeerAddress, Payload, Signal, WorldSnapshot, encode_frame};
use tokio::{
    io::AsyncWriteExt,
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};

use crate::{config::NodeConfig, error::NodeError};

/// Capacity of the command queue.
const COMMAND_QUEUE: usize = 64;

/// Capacity of the notice broadcast ring.
const NOTICE_QUEUE: usize = 256;

/// Observable state, returned by [`NodeHandle::status`].
#[derive(Debug, Clone)]
pub struct NodeStatus {
    /// Session and its address.
    pub session: Session,
    /// Relay role.
    pub role: Option<Role>,
    /// Open channels in insertion order.
    pub connections: Vec<Channel>,
    /// Ordered message log.
    pub messages: Vec<Message>,
    /// Every fault recorded so far.
    pub faults: Vec<NetworkFault>,
    /// Current world snapshot.
    pub snapshot: WorldSnapshot,
}

/// Change notifications for the presentation layer.
#[derive(Debug, Clone)]
pub enum Notice {
    /// `open_session` settled.
    SessionResolved(Result<PeerAddress, ConnectionError>),
    /// A channel joined the connection set.
    ChannelReady(Channel),
    /// A peer's inbound channel was accepted while hosting. Follows the
    /// matching [`Notice::ChannelReady`].
    PeerJoined(Channel),
    /// A channel left the connection set.
    ChannelRemoved(Channel),
    /// A fault was recorded.
    Fault(NetworkFault),
    /// A message entered the log.
    Message(Message),
    /// A remote snapshot replaced ours.
    Snapshot(WorldSnapshot),
}

enum Command {
    OpenSession(oneshot::Sender<Result<PeerAddress, ConnectionError>>),
    BecomeHost(oneshot::Sender<Result<(), ConnectionError>>),
    Connect { address: PeerAddress, reply: oneshot::Sender<Result<Channel, ConnectionError>> },
    Submit { text: String, reply: oneshot::Sender<Result<(), ConnectionError>> },
    UpdateSnapshot { snapshot: WorldSnapshot, reply: oneshot::Sender<()> },
    Status(oneshot::Sender<NodeStatus>),
    CloseSession(oneshot::Sender<()>),
    Shutdown,
}

/// Events posted by I/O tasks.
enum IoEvent<S> {
    Signal { generation: u64, signal: Signal },
    SignalingEnded { generation: u64 },
    Inbound { remote: PeerAddress, stream: S },
    Established { channel: ChannelId, stream: S },
    Data { channel: ChannelId, body: Bytes },
    Ended { channel: ChannelId },
}

struct SignalingLink {
    outbound: mpsc::UnboundedSender<Signal>,
    task: JoinHandle<()>,
}

struct ChannelLink {
    outbound: mpsc::UnboundedSender<Bytes>,
    reader: JoinHandle<()>,
}

/// Cloneable command surface of a running [`Node`].
#[derive(Clone)]
pub struct NodeHandle {
    commands: mpsc::Sender<Command>,
    notices: broadcast::Sender<Notice>,
}

impl NodeHandle {
    /// Register with the rendezvous service; resolves with our address.
    pub async fn open_session(&self) -> Result<PeerAddress, NodeError> {
        Ok(self.request(Command::OpenSession).await??)
    }

    /// Start accepting peers.
    pub async fn become_host(&self) -> Result<(), NodeError> {
        Ok(self.request(Command::BecomeHost).await??)
    }

    /// Join the participant at `address`; resolves with the open channel.
    pub async fn connect_to_peer(&self, address: PeerAddress) -> Result<Channel, NodeError> {
        Ok(self.request(|reply| Command::Connect { address, reply }).await??)
    }

    /// Log a message and send it on.
    pub async fn submit_message(&self, text: impl Into<String>) -> Result<(), NodeError> {
        let text = text.into();
        Ok(self.request(|reply| Command::Submit { text, reply }).await??)
    }

    /// Replace and broadcast the world snapshot.
    pub async fn update_snapshot(&self, snapshot: WorldSnapshot) -> Result<(), NodeError> {
        self.request(|reply| Command::UpdateSnapshot { snapshot, reply }).await
    }

    /// Current observable state.
    pub async fn status(&self) -> Result<NodeStatus, NodeError> {
        self.request(Command::Status).await
    }

    /// Close the session and every channel.
    pub async fn close_session(&self) -> Result<(), NodeError> {
        self.request(Command::CloseSession).await
    }

    /// Stop the event loop after closing the session.
    pub async fn shutdown(&self) -> Result<(), NodeError> {
        self.commands.send(Command::Shutdown).await.map_err(|_| NodeError::Stopped)
    }

    /// Receive change notifications from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    async fn request<R>(
        &self,
        command: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, NodeError> {
        let (reply, response) = oneshot::channel();
        self.commands.send(command(reply)).await.map_err(|_| NodeError::Stopped)?;
        response.await.map_err(|_| NodeError::Stopped)
    }
}

/// Participant runtime over transport `T`.
pub struct Node<E: Environment, T: Transport> {
    env: E,
    transport: T,
    config: NodeConfig,
    participant: Participant<E>,

    listener: Option<T::Listener>,
    advertise_port: u16,

    commands: mpsc::Receiver<Command>,
    io_tx: mpsc::UnboundedSender<IoEvent<T::Stream>>,
    io_rx: mpsc::UnboundedReceiver<IoEvent<T::Stream>>,
    notices: broadcast::Sender<Notice>,

    signaling: Option<SignalingLink>,
    signaling_generation: u64,
    lookups: HashMap<PeerAddress, Vec<ChannelId>>,
    handshakes: HashMap<ChannelId, T::Stream>,
    links: HashMap<ChannelId, ChannelLink>,

    pending_open: Option<oneshot::Sender<Result<PeerAddress, ConnectionError>>>,
    pending_connects: HashMap<ChannelId, Vec<oneshot::Sender<Result<Channel, ConnectionError>>>>,
}

impl<E: Environment, T: Transport> Node<E, T> {
    /// Bind the channel listener and build the node.
    ///
    /// # Errors
    ///
    /// Returns `NodeError::Io` if the listen address cannot be bound.
    pub async fn bind(
        env: E,
        transport: T,
        config: NodeConfig,
    ) -> Result<(Self, NodeHandle), NodeError> {
        let listener = transport.bind(&config.listen_address).await?;
        let bound = listener.local_addr()?;
        let advertise_port = config.advertise_port.unwrap_or_else(|| bound.port());
        tracing::info!(%bound, advertise_port, "channel listener bound");

        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let (io_tx, io_rx) = mpsc::unbounded_channel();
        let (notices, _) = broadcast::channel(NOTICE_QUEUE);

        let participant = Participant::new(env.clone(), config.manager);
        let handle = NodeHandle { commands: command_tx, notices: notices.clone() };

        let node = Self {
            env,
            transport,
            config,
            participant,
            listener: Some(listener),
            advertise_port,
            commands,
            io_tx,
            io_rx,
            notices,
            signaling: None,
            signaling_generation: 0,
            lookups: HashMap::new(),
            handshakes: HashMap::new(),
            links: HashMap::new(),
            pending_open: None,
            pending_connects: HashMap::new(),
        };
        Ok((node, handle))
    }

    /// Bind and run the node on a new task.
    pub async fn spawn(
        env: E,
        transport: T,
        config: NodeConfig,
    ) -> Result<(NodeHandle, JoinHandle<()>), NodeError> {
        let (node, handle) = Self::bind(env, transport, config).await?;
        Ok((handle, tokio::spawn(node.run())))
    }

    /// Run until shut down or every handle is dropped.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let actions = self.participant.handle(ParticipantEvent::Tick);
                    self.execute(actions);
                },
                Some(event) = self.io_rx.recv() => self.on_io(event),
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
            }
        }

        let actions = self.participant.close_session();
        self.execute(actions);
        tracing::info!("node stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::OpenSession(reply) => match self.participant.open_session() {
                Ok(actions) => {
                    self.pending_open = Some(reply);
                    self.execute(actions);
                },
                Err(e) => {
                    let _ = reply.send(Err(e));
                },
            },
            Command::BecomeHost(reply) => {
                let result = self.participant.become_host().map(|actions| self.execute(actions));
                let _ = reply.send(result);
            },
            Command::Connect { address, reply } => match self.participant.connect_to_peer(address) {
                Ok((ConnectOutcome::Existing(channel), _)) => {
                    let _ = reply.send(Ok(channel));
                },
                Ok((ConnectOutcome::Pending(id), actions)) => {
                    self.pending_connects.entry(id).or_default().push(reply);
                    self.execute(actions);
                },
                Err(e) => {
                    let _ = reply.send(Err(e));
                },
            },
            Command::Submit { text, reply } => {
                let result =
                    self.participant.submit_message(&text).map(|actions| self.execute(actions));
                let _ = reply.send(result);
            },
            Command::UpdateSnapshot { snapshot, reply } => {
                let actions = self.participant.update_snapshot(snapshot);
                self.execute(actions);
                let _ = reply.send(());
            },
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            },
            Command::CloseSession(reply) => {
                let actions = self.participant.close_session();
                self.execute(actions);
                let _ = reply.send(());
            },
            // Handled by the loop.
            Command::Shutdown => {},
        }
    }

    fn on_io(&mut self, event: IoEvent<T::Stream>) {
        match event {
            IoEvent::Signal { generation, signal } => {
                if generation == self.signaling_generation {
                    self.on_signal(signal);
                }
            },
            IoEvent::SignalingEnded { generation } => {
                if generation == self.signaling_generation {
                    self.signaling = None;
                    self.fail_lookups();
                    self.feed(ManagerEvent::SignalingClosed);
                }
            },
            IoEvent::Inbound { remote, stream } => {
                let channel = self.participant.next_channel_id();
                self.handshakes.insert(channel, stream);
                self.feed(ManagerEvent::IncomingChannel { channel, remote });
            },
            IoEvent::Established { channel, stream } => {
                self.install_link(channel, stream);
                self.feed(ManagerEvent::ChannelOpened { channel });
            },
            IoEvent::Data { channel, body } => {
                let actions =
                    self.participant.handle(ParticipantEvent::ChannelData { channel, body });
                self.execute(actions);
            },
            IoEvent::Ended { channel } => {
                self.handshakes.remove(&channel);
                if let Some(link) = self.links.remove(&channel) {
                    link.reader.abort();
                }
                self.feed(ManagerEvent::ChannelClosed { channel });
            },
        }
    }

    fn on_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Registered { address } => self.feed(ManagerEvent::SignalingOpened { address }),
            Signal::Located { address, endpoint } => {
                for channel in self.lookups.remove(&address).unwrap_or_default() {
                    self.dial(channel, endpoint);
                }
            },
            Signal::Unknown { address } => {
                tracing::debug!(%address, "rendezvous does not know address");
                for channel in self.lookups.remove(&address).unwrap_or_default() {
                    self.feed(ManagerEvent::ChannelClosed { channel });
                }
            },
            Signal::Register { .. } | Signal::Lookup { .. } => {
                tracing::warn!(?signal, "unexpected signal from rendezvous");
            },
        }
    }

    fn feed(&mut self, event: ManagerEvent) {
        let actions = self.participant.handle(event.into());
        self.execute(actions);
    }

    fn execute(&mut self, actions: Vec<ParticipantAction>) {
        for action in actions {
            match action {
                ParticipantAction::Manager(action) => self.execute_manager(action),
                ParticipantAction::Relay(action) => self.execute_relay(action),
            }
        }
    }

    fn execute_manager(&mut self, action: ManagerAction) {
        match action {
            ManagerAction::Register => self.start_signaling(),
            ManagerAction::DestroySignaling => self.stop_signaling(),
            ManagerAction::Listen => self.start_accepting(),
            ManagerAction::Connect { channel, remote } => self.lookup(channel, remote),
            ManagerAction::Accept { channel } => self.accept(channel),
            ManagerAction::CloseChannel { channel } => {
                self.handshakes.remove(&channel);
                // Dropping the writer's sender shuts the stream down.
                if let Some(link) = self.links.remove(&channel) {
                    link.reader.abort();
                }
            },
            ManagerAction::ChannelReady(channel) => {
                self.notify(Notice::ChannelReady(channel));
                if let Some(joined) = self.participant.take_incoming_channel() {
                    self.notify(Notice::PeerJoined(joined));
                }
            },
            ManagerAction::ChannelRemoved(channel) => self.notify(Notice::ChannelRemoved(channel)),
            ManagerAction::SessionResolved(result) => {
                if let Some(reply) = self.pending_open.take() {
                    let _ = reply.send(result.clone());
                }
                self.notify(Notice::SessionResolved(result));
            },
            ManagerAction::ConnectResolved { channel, result } => {
                for reply in self.pending_connects.remove(&channel).unwrap_or_default() {
                    let _ = reply.send(result.clone());
                }
            },
            ManagerAction::FaultRecorded(fault) => self.notify(Notice::Fault(fault)),
        }
    }

    fn execute_relay(&mut self, action: RelayAction) {
        match action {
            RelayAction::Send { channel, payload } => self.send(channel, &payload),
            RelayAction::MessageLogged { message, .. } => self.notify(Notice::Message(message)),
            RelayAction::SnapshotReplaced(snapshot) => self.notify(Notice::Snapshot(snapshot)),
        }
    }

    fn notify(&self, notice: Notice) {
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }

    fn status(&self) -> NodeStatus {
        NodeStatus {
            session: self.participant.session().clone(),
            role: self.participant.role(),
            connections: self.participant.list_connections().to_vec(),
            messages: self.participant.messages().to_vec(),
            faults: self.participant.faults().faults().to_vec(),
            snapshot: self.participant.snapshot().clone(),
        }
    }

    fn send(&self, channel: ChannelId, payload: &Payload) {
        let Some(link) = self.links.get(&channel) else {
            tracing::debug!(%channel, "send on closed channel dropped");
            return;
        };

        match encode_frame(payload) {
            Ok(frame) => {
                let _ = link.outbound.send(frame);
            },
            Err(e) => tracing::warn!(%channel, error = %e, "payload not sent"),
        }
    }

    fn start_signaling(&mut self) {
        self.stop_signaling();

        let generation = self.signaling_generation;
        let (outbound, queue) = mpsc::unbounded_channel();
        let _ = outbound.send(Signal::Register { port: self.advertise_port });

        let transport = self.transport.clone();
        let address = self.config.rendezvous_address.clone();
        let events = self.io_tx.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = run_signaling(transport, &address, queue, generation, &events).await {
                tracing::debug!(error = %e, "signaling link ended");
            }
            let _ = events.send(IoEvent::SignalingEnded { generation });
        });

        self.signaling = Some(SignalingLink { outbound, task });
    }

    fn stop_signaling(&mut self) {
        self.signaling_generation += 1;
        if let Some(link) = self.signaling.take() {
            link.task.abort();
        }
        self.fail_lookups();
    }

    /// Lookups waiting on a dead signaling link fail their channels.
    fn fail_lookups(&mut self) {
        for channel in self.lookups.drain().flat_map(|(_, channels)| channels) {
            let _ = self.io_tx.send(IoEvent::Ended { channel });
        }
    }

    fn lookup(&mut self, channel: ChannelId, remote: PeerAddress) {
        let sent = self
            .signaling
            .as_ref()
            .is_some_and(|link| {
                link.outbound.send(Signal::Lookup { address: remote.clone() }).is_ok()
            });

        if sent {
            self.lookups.entry(remote).or_default().push(channel);
        } else {
            let _ = self.io_tx.send(IoEvent::Ended { channel });
        }
    }

    fn dial(&self, channel: ChannelId, endpoint: SocketAddr) {
        let Some(local) = self.participant.local_address().cloned() else {
            let _ = self.io_tx.send(IoEvent::Ended { channel });
            return;
        };

        let transport = self.transport.clone();
        let events = self.io_tx.clone();
        tokio::spawn(async move {
            let event = match dial_handshake(&transport, endpoint, local).await {
                Ok(stream) => IoEvent::Established { channel, stream },
                Err(e) => {
                    tracing::debug!(%channel, %endpoint, error = %e, "dial failed");
                    IoEvent::Ended { channel }
                },
            };
            let _ = events.send(event);
        });
    }

    fn start_accepting(&mut self) {
        let Some(listener) = self.listener.take() else {
            // Already accepting; the manager refuses inbound while not hosting.
            return;
        };

        let env = self.env.clone();
        let timeout = self.config.manager.connection_timeout;
        let events = self.io_tx.clone();
        tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    },
                };

                let env = env.clone();
                let events = events.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        hello = read_hello(stream) => match hello {
                            Ok((remote, stream)) => {
                                let _ = events.send(IoEvent::Inbound { remote, stream });
                            },
                            Err(e) => {
                                tracing::debug!(%peer, error = %e, "inbound handshake failed");
                            },
                        },
                        () = env.sleep(timeout) => {
                            tracing::debug!(%peer, "inbound handshake timed out");
                        },
                    }
                });
            }
        });
    }

    fn accept(&mut self, channel: ChannelId) {
        let Some(mut stream) = self.handshakes.remove(&channel) else {
            let _ = self.io_tx.send(IoEvent::Ended { channel });
            return;
        };

        let events = self.io_tx.clone();
        tokio::spawn(async move {
            let event = match write_frame(&mut stream, &Handshake::HelloAck).await {
                Ok(()) => IoEvent::Established { channel, stream },
                Err(e) => {
                    tracing::debug!(%channel, error = %e, "accept handshake failed");
                    IoEvent::Ended { channel }
                },
            };
            let _ = events.send(event);
        });
    }

    fn install_link(&mut self, channel: ChannelId, stream: T::Stream) {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let (outbound, mut queue) = mpsc::unbounded_channel::<Bytes>();

        tokio::spawn(async move {
            while let Some(frame) = queue.recv().await {
                if writer.write_all(&frame).await.is_err() {
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });

        let events = self.io_tx.clone();
        let reader = tokio::spawn(async move {
            loop {
                match read_frame_bytes(&mut reader).await {
                    Ok(Some(body)) => {
                        if events.send(IoEvent::Data { channel, body }).is_err() {
                            return;
                        }
                    },
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!(%channel, error = %e, "channel read failed");
                        break;
                    },
                }
            }
            let _ = events.send(IoEvent::Ended { channel });
        });

        self.links.insert(channel, ChannelLink { outbound, reader });
    }
}

async fn run_signaling<T: Transport>(
    transport: T,
    address: &str,
    mut queue: mpsc::UnboundedReceiver<Signal>,
    generation: u64,
    events: &mpsc::UnboundedSender<IoEvent<T::Stream>>,
) -> Result<(), TransportError> {
    let stream = transport.connect(address).await?;
    let (mut reader, mut writer) = tokio::io::split(stream);

    let writer_task = tokio::spawn(async move {
        while let Some(signal) = queue.recv().await {
            if write_frame(&mut writer, &signal).await.is_err() {
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    let result = loop {
        match read_frame::<_, Signal>(&mut reader).await {
            Ok(Some(signal)) => {
                if events.send(IoEvent::Signal { generation, signal }).is_err() {
                    break Ok(());
                }
            },
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    writer_task.abort();
    result
}

async fn dial_handshake<T: Transport>(
    transport: &T,
    endpoint: SocketAddr,
    local: PeerAddress,
) -> Result<T::Stream, TransportError> {
    let mut stream = transport.connect(&endpoint.to_string()).await?;
    write_frame(&mut stream, &Handshake::Hello { from: local }).await?;

    match read_frame::<_, Handshake>(&mut stream).await? {
        Some(Handshake::HelloAck) => Ok(stream),
        Some(Handshake::Hello { .. }) | None => Err(TransportError::Closed),
    }
}

async fn read_hello<S>(mut stream: S) -> Result<(PeerAddress, S), TransportError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    match read_frame::<_, Handshake>(&mut stream).await? {
        Some(Handshake::Hello { from }) => Ok((from, stream)),
        Some(Handshake::HelloAck) | None => Err(TransportError::Closed),
    }
}
