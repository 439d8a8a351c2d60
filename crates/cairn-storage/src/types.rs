use std::collections::BTreeMap;

use uuid::Uuid;

use cairn_types::{Key, Timestamp, Transaction, TransactionStatus, Value};

/// The parts of a transaction an intent needs to carry.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TxnMeta {
    pub id: Uuid,
    /// Anchor key of the owning transaction.
    pub key: Key,
    pub epoch: u32,
    pub timestamp: Timestamp,
    pub priority: i32,
}

impl From<&Transaction> for TxnMeta {
    fn from(txn: &Transaction) -> Self {
        TxnMeta {
            id: txn.id,
            key: txn.key.clone(),
            epoch: txn.epoch,
            timestamp: txn.timestamp,
            priority: txn.priority,
        }
    }
}

/// A provisional write. `value == None` is a provisional delete.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Intent {
    pub txn: TxnMeta,
    pub value: Option<Value>,
}

/// Everything stored under one key: committed versions plus at most one intent.
///
/// A version mapped to `None` is a tombstone.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct KeyRecord {
    pub intent: Option<Intent>,
    pub versions: BTreeMap<Timestamp, Option<Value>>,
}

impl KeyRecord {
    pub fn is_empty(&self) -> bool {
        self.intent.is_none() && self.versions.is_empty()
    }

    /// Newest committed version at or below `ts`.
    pub fn version_at(&self, ts: Timestamp) -> Option<(Timestamp, Option<&Value>)> {
        self.versions
            .range(..=ts)
            .next_back()
            .map(|(ts, v)| (*ts, v.as_ref()))
    }

    pub fn latest(&self) -> Option<(Timestamp, Option<&Value>)> {
        self.versions.iter().next_back().map(|(ts, v)| (*ts, v.as_ref()))
    }

    /// Newest committed live value, ignoring any intent.
    pub fn latest_value(&self) -> Option<&Value> {
        self.latest().and_then(|(_, v)| v)
    }
}

/// Aggregate counters over a key span.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MvccStats {
    /// Keys whose newest committed version is live.
    pub live_count: i64,
    /// Key plus value bytes of live keys.
    pub live_bytes: i64,
    /// Keys with any record at all, tombstones and intents included.
    pub key_count: i64,
    pub intent_count: i64,
}

impl MvccStats {
    pub fn add(&mut self, other: &MvccStats) {
        self.live_count += other.live_count;
        self.live_bytes += other.live_bytes;
        self.key_count += other.key_count;
        self.intent_count += other.intent_count;
    }
}

/// Outcome applied to one intent of a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentResolution {
    pub txn_id: Uuid,
    pub epoch: u32,
    pub status: TransactionStatus,
    pub timestamp: Timestamp,
}

impl From<&Transaction> for IntentResolution {
    fn from(txn: &Transaction) -> Self {
        IntentResolution {
            txn_id: txn.id,
            epoch: txn.epoch,
            status: txn.status,
            timestamp: txn.timestamp,
        }
    }
}
