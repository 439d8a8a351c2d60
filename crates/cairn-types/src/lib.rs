mod error;
mod timestamp;
mod txn;

pub use error::{CairnError, ErrorKind};
pub use timestamp::Timestamp;
pub use txn::{make_priority, IsolationType, MAX_USER_PRIORITY, Transaction, TransactionStatus};

pub type NodeId = u64;
pub type StoreId = u64;
/// Identifier of a range's consensus group.
pub type RaftId = u64;
pub type Key = Vec<u8>;

pub const KEY_MIN: &[u8] = b"";
/// Exclusive upper bound of the key space.
pub const KEY_MAX: &[u8] = b"\xff\xff";

/// Unique tag of a client-issued command, used for replay protection.
///
/// Ordering follows wall time, which is only a locality hint.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct ClientCmdId {
    /// Nanoseconds since the Unix epoch when the command was created.
    pub wall_time: i64,
    pub random: i64,
}

impl ClientCmdId {
    pub fn new(wall_time: i64, random: i64) -> Self {
        ClientCmdId { wall_time, random }
    }

    pub fn generate(wall_time: i64) -> Self {
        ClientCmdId { wall_time, random: rand::random() }
    }

    pub fn is_empty(&self) -> bool {
        self.wall_time == 0 && self.random == 0
    }
}

/// A stored payload. An empty byte string is a value, not an absence.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Value {
    Bytes(Vec<u8>),
    /// Written only through Increment.
    Integer(i64),
}

impl Value {
    pub fn bytes(b: impl Into<Vec<u8>>) -> Self {
        Value::Bytes(b.into())
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Integer(_) => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Bytes(_) => None,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            Value::Bytes(b) => b.len(),
            Value::Integer(_) => 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct KeyValue {
    pub key: Key,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ReadConsistency {
    /// Committed data only, served under the replica's lease.
    #[default]
    Consistent,
    /// Like `Consistent`, additionally confirmed by a quorum.
    Consensus,
    /// Latest committed value; pending intents are ignored.
    Inconsistent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ReplicaDescriptor {
    pub node_id: NodeId,
    pub store_id: StoreId,
}

/// Key span `[start_key, end_key)` of a range and the replicas serving it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RangeDescriptor {
    pub raft_id: RaftId,
    pub start_key: Key,
    pub end_key: Key,
    pub replicas: Vec<ReplicaDescriptor>,
}

impl RangeDescriptor {
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.start_key.as_slice() <= key && key < self.end_key.as_slice()
    }

    /// `end` empty means the single key `start`.
    pub fn contains_key_range(&self, start: &[u8], end: &[u8]) -> bool {
        if end.is_empty() {
            return self.contains_key(start);
        }
        self.start_key.as_slice() <= start && end <= self.end_key.as_slice()
    }
}
