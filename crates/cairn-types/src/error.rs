use uuid::Uuid;

use crate::{Key, RaftId, Timestamp, TransactionStatus, Value};

/// Coarse classification of a [`CairnError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed request, rejected before any side effect.
    Validation,
    /// Value mismatch or transaction conflict; carries what the caller needs to retry.
    Conflict,
    /// Lease or quorum unavailable. About availability, not correctness.
    Consistency,
    /// The request reached a replica whose range no longer covers its keys.
    Routing,
    Internal,
}

/// Error carried in a response header.
///
/// Serializable so that it can be cached and replayed with the response it
/// belongs to.
#[derive(thiserror::Error, Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum CairnError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{method} requires a transaction")]
    OpRequiresTxn { method: String },
    #[error("unexpected value: {actual_value:?}")]
    ConditionFailed { actual_value: Option<Value> },
    #[error("key {key:?}: {reason}")]
    ValueKindMismatch { key: Key, reason: String },
    #[error("conflicting intent on key {key:?} from txn {txn_id} (priority {priority})")]
    WriteIntent { key: Key, txn_id: Uuid, priority: i32 },
    #[error("txn {txn_id} aborted")]
    TransactionAborted { txn_id: Uuid, priority: i32 },
    #[error("txn {txn_id} is {status:?}: {reason}")]
    TransactionStatus { txn_id: Uuid, status: TransactionStatus, reason: String },
    #[error("txn {txn_id} must retry: timestamp moved from {orig_timestamp} to {timestamp}")]
    TransactionRetry { txn_id: Uuid, orig_timestamp: Timestamp, timestamp: Timestamp },
    #[error("read at {read_timestamp} found value at {existing_timestamp} within uncertainty interval")]
    ReadWithinUncertaintyInterval { read_timestamp: Timestamp, existing_timestamp: Timestamp },
    #[error("replica does not hold the lease for range {raft_id}")]
    NotLeaseHolder { raft_id: RaftId },
    #[error("consensus read unavailable for range {raft_id}")]
    ConsensusUnavailable { raft_id: RaftId },
    #[error("keys {start:?}..{end:?} outside of range {raft_id}")]
    RangeKeyMismatch { start: Key, end: Key, raft_id: RaftId },
    #[error("range {raft_id} not found")]
    RangeNotFound { raft_id: RaftId },
    #[error("not executed: {0}")]
    NotExecuted(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl CairnError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CairnError::InvalidArgument(_)
            | CairnError::OpRequiresTxn { .. }
            | CairnError::ValueKindMismatch { .. } => ErrorKind::Validation,
            CairnError::ConditionFailed { .. }
            | CairnError::WriteIntent { .. }
            | CairnError::TransactionAborted { .. }
            | CairnError::TransactionStatus { .. }
            | CairnError::TransactionRetry { .. }
            | CairnError::ReadWithinUncertaintyInterval { .. } => ErrorKind::Conflict,
            CairnError::NotLeaseHolder { .. } | CairnError::ConsensusUnavailable { .. } => {
                ErrorKind::Consistency
            }
            CairnError::RangeKeyMismatch { .. } | CairnError::RangeNotFound { .. } => {
                ErrorKind::Routing
            }
            CairnError::NotExecuted(_) | CairnError::Storage(_) => ErrorKind::Internal,
        }
    }

    /// Whether re-sending the same request may succeed.
    ///
    /// Responses carrying a retryable error are never cached for replay.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            CairnError::WriteIntent { .. }
                | CairnError::TransactionAborted { .. }
                | CairnError::TransactionRetry { .. }
                | CairnError::ReadWithinUncertaintyInterval { .. }
                | CairnError::NotLeaseHolder { .. }
                | CairnError::ConsensusUnavailable { .. }
                | CairnError::RangeKeyMismatch { .. }
                | CairnError::RangeNotFound { .. }
        )
    }

    /// Whether the error means the transaction must restart before continuing.
    pub fn requires_txn_restart(&self) -> bool {
        matches!(
            self,
            CairnError::WriteIntent { .. }
                | CairnError::TransactionAborted { .. }
                | CairnError::TransactionRetry { .. }
                | CairnError::ReadWithinUncertaintyInterval { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_and_retry() {
        let e = CairnError::ConditionFailed { actual_value: None };
        assert_eq!(e.kind(), ErrorKind::Conflict);
        assert!(!e.retryable());

        let e = CairnError::ConsensusUnavailable { raft_id: 1 };
        assert_eq!(e.kind(), ErrorKind::Consistency);
        assert!(e.retryable());
        assert!(!e.requires_txn_restart());

        let e = CairnError::WriteIntent { key: b"k".to_vec(), txn_id: Uuid::nil(), priority: 3 };
        assert!(e.requires_txn_restart());
        assert_eq!(CairnError::InvalidArgument("x".into()).kind(), ErrorKind::Validation);
    }
}
