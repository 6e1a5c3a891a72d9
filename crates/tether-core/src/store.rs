//! World state store: the replicated snapshot and the ordered message log.

use tether_proto::{Message, WorldSnapshot};

/// Storage for one participant's replicated state.
///
/// Nothing is persisted across restarts; the trait exists so the runtime can
/// observe or mirror state without the relay knowing about it.
pub trait WorldStore {
    /// Current world snapshot.
    fn snapshot(&self) -> &WorldSnapshot;

    /// Replace the snapshot (last writer wins).
    fn replace_snapshot(&mut self, snapshot: WorldSnapshot);

    /// Insert `message` in timestamp order. Returns its position.
    fn append_message(&mut self, message: Message) -> usize;

    /// Messages sorted by timestamp ascending.
    fn messages(&self) -> &[Message];
}

/// Timestamp-ordered message log.
///
/// Equal timestamps keep arrival order, so the sort is stable across appends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageLog {
    messages: Vec<Message>,
}

impl MessageLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ordered insert after every message with a timestamp `<=` this one.
    pub fn insert(&mut self, message: Message) -> usize {
        let index = self.messages.partition_point(|m| m.timestamp <= message.timestamp);
        self.messages.insert(index, message);
        index
    }

    /// Messages in order.
    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True when no message has been logged.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// In-memory [`WorldStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    snapshot: WorldSnapshot,
    log: MessageLog,
}

impl MemoryStore {
    /// Empty snapshot, empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an initial snapshot.
    pub fn with_snapshot(snapshot: WorldSnapshot) -> Self {
        Self { snapshot, log: MessageLog::new() }
    }
}

impl WorldStore for MemoryStore {
    fn snapshot(&self) -> &WorldSnapshot {
        &self.snapshot
    }

    fn replace_snapshot(&mut self, snapshot: WorldSnapshot) {
        self.snapshot = snapshot;
    }

    fn append_message(&mut self, message: Message) -> usize {
        self.log.insert(message)
    }

    fn messages(&self) -> &[Message] {
        self.log.as_slice()
    }
}
