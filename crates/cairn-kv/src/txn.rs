//! Store-wide transaction records and conflict resolution between them.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use parking_lot::Mutex;
use uuid::Uuid;

use cairn_storage::IntentResolution;
use cairn_types::{
    make_priority, CairnError, IsolationType, Key, Timestamp, Transaction, TransactionStatus,
};

#[derive(Debug, Clone)]
pub struct TxnRecord {
    pub txn: Transaction,
    /// Keys the transaction has written intents on.
    pub intents: BTreeSet<Key>,
    /// Physical time (ns) the record was finalized.
    pub finished_at: Option<i64>,
}

/// The side of a conflict that wants the other out of the way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pusher {
    /// `None` for non-transactional requests.
    pub id: Option<Uuid>,
    pub priority: i32,
    pub orig_timestamp: Timestamp,
}

impl Pusher {
    pub fn for_txn(txn: &Transaction) -> Self {
        Pusher { id: Some(txn.id), priority: txn.priority, orig_timestamp: txn.orig_timestamp }
    }

    pub fn non_txn(user_priority: i32, timestamp: Timestamp) -> Self {
        Pusher { id: None, priority: make_priority(user_priority), orig_timestamp: timestamp }
    }

    /// Orders by priority, then the older transaction, then id.
    pub fn wins_over(&self, pushee: &Transaction) -> bool {
        (self.priority, std::cmp::Reverse(self.orig_timestamp), std::cmp::Reverse(self.id))
            > (pushee.priority, std::cmp::Reverse(pushee.orig_timestamp), std::cmp::Reverse(Some(pushee.id)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushKind {
    /// A writer needs the intent gone.
    Abort,
    /// A reader at this timestamp needs the intent above it.
    Timestamp(Timestamp),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// The pushee is finished, was aborted, or was moved above the reader.
    /// `intents` lists the keys to clean up when the pushee is finished.
    Resolved { resolution: IntentResolution, intents: Vec<Key> },
    /// The pushee won; the pusher must back off.
    Refused { priority: i32 },
}

#[derive(Default)]
pub struct TxnTable {
    records: Mutex<HashMap<Uuid, TxnRecord>>,
}

fn check_pending(record: &TxnRecord) -> Result<(), CairnError> {
    match record.txn.status {
        TransactionStatus::Pending => Ok(()),
        TransactionStatus::Aborted => Err(CairnError::TransactionAborted {
            txn_id: record.txn.id,
            priority: record.txn.priority,
        }),
        TransactionStatus::Committed => Err(CairnError::TransactionStatus {
            txn_id: record.txn.id,
            status: TransactionStatus::Committed,
            reason: "already committed".into(),
        }),
    }
}

impl TxnTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &Uuid) -> Option<TxnRecord> {
        self.records.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Merges the record's state (pushes, priority) into `txn`.
    ///
    /// Fails if the record is already finalized. Does not create a record.
    pub fn refresh(&self, txn: &Transaction) -> Result<Transaction, CairnError> {
        let g = self.records.lock();
        let mut merged = txn.clone();
        if let Some(record) = g.get(&txn.id) {
            check_pending(record)?;
            merged.update(&record.txn);
        }
        Ok(merged)
    }

    /// Like [`Self::refresh`], creating a pending record on first write.
    pub fn begin_write(&self, txn: &Transaction) -> Result<Transaction, CairnError> {
        let mut g = self.records.lock();
        let record = g.entry(txn.id).or_insert_with(|| TxnRecord {
            txn: txn.clone(),
            intents: BTreeSet::new(),
            finished_at: None,
        });
        check_pending(record)?;
        record.txn.update(txn);
        Ok(record.txn.clone())
    }

    pub fn add_intent(&self, txn_id: &Uuid, key: &[u8]) {
        if let Some(record) = self.records.lock().get_mut(txn_id) {
            record.intents.insert(key.to_vec());
        }
    }

    /// Intent keys recorded for `txn_id`; empty without a record.
    pub fn intents(&self, txn_id: &Uuid) -> BTreeSet<Key> {
        self.records.lock().get(txn_id).map(|r| r.intents.clone()).unwrap_or_default()
    }

    /// Resets the intent set of a pending record to `intents`, undoing
    /// [`Self::add_intent`] calls made since it was captured.
    pub fn restore_intents(&self, txn_id: &Uuid, intents: BTreeSet<Key>) {
        if let Some(record) = self.records.lock().get_mut(txn_id) {
            if !record.txn.is_finalized() {
                record.intents = intents;
            }
        }
    }

    /// Resolves a conflict between `pusher` and the owner of an intent.
    ///
    /// An intent whose owner has no record is treated as abandoned.
    pub fn push(&self, pusher: &Pusher, pushee_id: Uuid, kind: PushKind, now: i64) -> PushOutcome {
        let mut g = self.records.lock();
        let Some(record) = g.get_mut(&pushee_id) else {
            return PushOutcome::Resolved {
                resolution: IntentResolution {
                    txn_id: pushee_id,
                    epoch: 0,
                    status: TransactionStatus::Aborted,
                    timestamp: Timestamp::ZERO,
                },
                intents: Vec::new(),
            };
        };

        if record.txn.is_finalized() {
            return PushOutcome::Resolved {
                resolution: IntentResolution::from(&record.txn),
                intents: record.intents.iter().cloned().collect(),
            };
        }

        if let PushKind::Timestamp(ts) = kind {
            if record.txn.timestamp > ts {
                return PushOutcome::Resolved {
                    resolution: IntentResolution::from(&record.txn),
                    intents: Vec::new(),
                };
            }
        }

        if !pusher.wins_over(&record.txn) {
            tracing::debug!(
                pushee = %pushee_id,
                pusher_priority = pusher.priority,
                pushee_priority = record.txn.priority,
                "push refused"
            );
            return PushOutcome::Refused { priority: record.txn.priority };
        }

        match kind {
            PushKind::Abort => {
                record.txn.status = TransactionStatus::Aborted;
                record.finished_at = Some(now);
                tracing::debug!(pushee = %pushee_id, "pushed transaction aborted");
                PushOutcome::Resolved {
                    resolution: IntentResolution::from(&record.txn),
                    intents: record.intents.iter().cloned().collect(),
                }
            }
            PushKind::Timestamp(ts) => {
                record.txn.timestamp.forward(ts.next());
                tracing::debug!(pushee = %pushee_id, timestamp = %record.txn.timestamp, "pushed transaction timestamp");
                PushOutcome::Resolved { resolution: IntentResolution::from(&record.txn), intents: Vec::new() }
            }
        }
    }

    /// Commits or aborts `txn`. Returns the final transaction and the keys
    /// of its intents.
    ///
    /// A serializable transaction whose timestamp moved since it started
    /// cannot commit and gets `TransactionRetry`; its record stays pending.
    pub fn finalize(
        &self,
        txn: &Transaction,
        commit: bool,
        now: i64,
    ) -> Result<(Transaction, Vec<Key>), CairnError> {
        let mut g = self.records.lock();
        let record = g.entry(txn.id).or_insert_with(|| TxnRecord {
            txn: txn.clone(),
            intents: BTreeSet::new(),
            finished_at: None,
        });
        check_pending(record)?;
        record.txn.update(txn);

        let mut fin = record.txn.clone();
        if commit {
            if fin.isolation == IsolationType::Serializable && fin.timestamp != fin.orig_timestamp {
                return Err(CairnError::TransactionRetry {
                    txn_id: fin.id,
                    orig_timestamp: fin.orig_timestamp,
                    timestamp: fin.timestamp,
                });
            }
            fin.status = TransactionStatus::Committed;
        } else {
            fin.status = TransactionStatus::Aborted;
        }
        record.txn = fin.clone();
        record.finished_at = Some(now);
        Ok((fin, record.intents.iter().cloned().collect()))
    }

    /// Drops finished records older than `retention`.
    pub fn gc(&self, now: i64, retention: Duration) -> usize {
        let retention = retention.as_nanos() as i64;
        let mut g = self.records.lock();
        let before = g.len();
        g.retain(|_, r| match r.finished_at {
            Some(at) => now.saturating_sub(at) <= retention,
            None => true,
        });
        before - g.len()
    }
}
