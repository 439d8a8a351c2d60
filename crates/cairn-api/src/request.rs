use std::fmt;

use cairn_types::{CairnError, Key, RaftId, RangeDescriptor, ReadConsistency, Value};

use crate::header::RequestHeader;
use crate::union::RequestUnion;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ContainsRequest {
    pub header: RequestHeader,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GetRequest {
    pub header: RequestHeader,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PutRequest {
    pub header: RequestHeader,
    pub value: Value,
}

/// Stores `value` if the current value equals `exp_value`.
///
/// `exp_value == None` expects the key to be absent.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConditionalPutRequest {
    pub header: RequestHeader,
    pub value: Value,
    pub exp_value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct IncrementRequest {
    pub header: RequestHeader,
    pub increment: i64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DeleteRequest {
    pub header: RequestHeader,
}

/// Deletes `[header.key, header.end_key)`. Zero `max_entries_to_delete`
/// means unbounded.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DeleteRangeRequest {
    pub header: RequestHeader,
    pub max_entries_to_delete: i64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScanRequest {
    pub header: RequestHeader,
    pub max_results: i64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SplitTrigger {
    /// The split range, truncated to end at the split key.
    pub updated_desc: RangeDescriptor,
    /// The range created from the right half.
    pub new_desc: RangeDescriptor,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MergeTrigger {
    /// The left range, extended over the subsumed range.
    pub updated_desc: RangeDescriptor,
    pub subsumed_raft_id: RaftId,
}

/// Side effect applied atomically with a transaction commit and never on abort.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum InternalCommitTrigger {
    Split(SplitTrigger),
    Merge(MergeTrigger),
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EndTransactionRequest {
    pub header: RequestHeader,
    pub commit: bool,
    pub internal_commit_trigger: Option<InternalCommitTrigger>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BatchRequest {
    pub header: RequestHeader,
    pub requests: Vec<RequestUnion>,
}

/// Splits the range containing `header.key`. An empty `split_key` asks the
/// range to pick its median key.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AdminSplitRequest {
    pub header: RequestHeader,
    pub split_key: Key,
}

/// Merges the range containing `header.key` with its right neighbour.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AdminMergeRequest {
    pub header: RequestHeader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Contains,
    Get,
    Put,
    ConditionalPut,
    Increment,
    Delete,
    DeleteRange,
    Scan,
    EndTransaction,
    Batch,
    AdminSplit,
    AdminMerge,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Contains => "Contains",
            Method::Get => "Get",
            Method::Put => "Put",
            Method::ConditionalPut => "ConditionalPut",
            Method::Increment => "Increment",
            Method::Delete => "Delete",
            Method::DeleteRange => "DeleteRange",
            Method::Scan => "Scan",
            Method::EndTransaction => "EndTransaction",
            Method::Batch => "Batch",
            Method::AdminSplit => "AdminSplit",
            Method::AdminMerge => "AdminMerge",
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, Method::Contains | Method::Get | Method::Scan)
    }

    /// Mutations of user data. These are the only methods eligible for the
    /// atomic batch strategy.
    pub fn is_write_only(&self) -> bool {
        matches!(
            self,
            Method::Put
                | Method::ConditionalPut
                | Method::Increment
                | Method::Delete
                | Method::DeleteRange
        )
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Method::AdminSplit | Method::AdminMerge)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request: exactly one operation kind.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Request {
    Contains(ContainsRequest),
    Get(GetRequest),
    Put(PutRequest),
    ConditionalPut(ConditionalPutRequest),
    Increment(IncrementRequest),
    Delete(DeleteRequest),
    DeleteRange(DeleteRangeRequest),
    Scan(ScanRequest),
    EndTransaction(EndTransactionRequest),
    Batch(BatchRequest),
    AdminSplit(AdminSplitRequest),
    AdminMerge(AdminMergeRequest),
}

macro_rules! request_header {
    ($req:expr, $r:ident => $body:expr) => {
        match $req {
            Request::Contains($r) => $body,
            Request::Get($r) => $body,
            Request::Put($r) => $body,
            Request::ConditionalPut($r) => $body,
            Request::Increment($r) => $body,
            Request::Delete($r) => $body,
            Request::DeleteRange($r) => $body,
            Request::Scan($r) => $body,
            Request::EndTransaction($r) => $body,
            Request::Batch($r) => $body,
            Request::AdminSplit($r) => $body,
            Request::AdminMerge($r) => $body,
        }
    };
}

impl Request {
    pub fn header(&self) -> &RequestHeader {
        request_header!(self, r => &r.header)
    }

    pub fn header_mut(&mut self) -> &mut RequestHeader {
        request_header!(self, r => &mut r.header)
    }

    pub fn method(&self) -> Method {
        match self {
            Request::Contains(_) => Method::Contains,
            Request::Get(_) => Method::Get,
            Request::Put(_) => Method::Put,
            Request::ConditionalPut(_) => Method::ConditionalPut,
            Request::Increment(_) => Method::Increment,
            Request::Delete(_) => Method::Delete,
            Request::DeleteRange(_) => Method::DeleteRange,
            Request::Scan(_) => Method::Scan,
            Request::EndTransaction(_) => Method::EndTransaction,
            Request::Batch(_) => Method::Batch,
            Request::AdminSplit(_) => Method::AdminSplit,
            Request::AdminMerge(_) => Method::AdminMerge,
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.method().is_read_only()
    }

    pub fn is_write_only(&self) -> bool {
        self.method().is_write_only()
    }

    /// Operations that are meaningless outside a transaction.
    pub fn is_transactional_only(&self) -> bool {
        self.method() == Method::EndTransaction
    }

    /// Rejects malformed requests before execution.
    ///
    /// Batch sub-requests are validated by the batch executor after they
    /// inherit the batch header.
    pub fn validate(&self) -> Result<(), CairnError> {
        let header = self.header();
        header.validate()?;
        let method = self.method();

        if method.is_read_only()
            && header.txn.is_some()
            && header.read_consistency == ReadConsistency::Inconsistent
        {
            return Err(CairnError::InvalidArgument(
                "inconsistent reads are not allowed within a transaction".into(),
            ));
        }

        if self.is_transactional_only() && header.txn.is_none() {
            return Err(CairnError::OpRequiresTxn { method: method.to_string() });
        }

        match self {
            Request::Put(r) => check_byte_value(&r.header, &r.value),
            Request::ConditionalPut(r) => check_byte_value(&r.header, &r.value),
            Request::DeleteRange(r) => {
                if !r.header.is_range() {
                    return Err(CairnError::InvalidArgument("delete range requires an end key".into()));
                }
                if r.max_entries_to_delete < 0 {
                    return Err(CairnError::InvalidArgument(format!(
                        "max_entries_to_delete must be non-negative, got {}",
                        r.max_entries_to_delete
                    )));
                }
                Ok(())
            }
            Request::Scan(r) => {
                if !r.header.is_range() {
                    return Err(CairnError::InvalidArgument("scan requires an end key".into()));
                }
                if r.max_results <= 0 {
                    return Err(CairnError::InvalidArgument(format!(
                        "max_results must be positive, got {}",
                        r.max_results
                    )));
                }
                Ok(())
            }
            Request::EndTransaction(r) => {
                let txn_key = r.header.txn.as_ref().map(|t| t.key.as_slice());
                if txn_key != Some(r.header.key.as_slice()) {
                    return Err(CairnError::InvalidArgument(
                        "end transaction must be addressed to the transaction key".into(),
                    ));
                }
                if r.header.is_range() {
                    return Err(CairnError::InvalidArgument(
                        "end transaction addresses a single key".into(),
                    ));
                }
                Ok(())
            }
            Request::AdminSplit(r) => {
                if r.header.txn.is_some() {
                    return Err(CairnError::InvalidArgument(
                        "admin split runs its own transaction".into(),
                    ));
                }
                Ok(())
            }
            Request::AdminMerge(r) => {
                if r.header.txn.is_some() {
                    return Err(CairnError::InvalidArgument(
                        "admin merge runs its own transaction".into(),
                    ));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn check_byte_value(header: &RequestHeader, value: &Value) -> Result<(), CairnError> {
    if value.as_bytes().is_none() {
        return Err(CairnError::ValueKindMismatch {
            key: header.key.clone(),
            reason: "integer values are written through increment".into(),
        });
    }
    Ok(())
}

macro_rules! impl_from_request {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for Request {
                fn from(r: $ty) -> Self {
                    Request::$variant(r)
                }
            }
        )*
    };
}

impl_from_request!(
    Contains(ContainsRequest),
    Get(GetRequest),
    Put(PutRequest),
    ConditionalPut(ConditionalPutRequest),
    Increment(IncrementRequest),
    Delete(DeleteRequest),
    DeleteRange(DeleteRangeRequest),
    Scan(ScanRequest),
    EndTransaction(EndTransactionRequest),
    Batch(BatchRequest),
    AdminSplit(AdminSplitRequest),
    AdminMerge(AdminMergeRequest),
);

#[cfg(test)]
mod tests {
    use cairn_types::{IsolationType, Timestamp, Transaction};

    use super::*;

    fn scan(max_results: i64) -> Request {
        ScanRequest { header: RequestHeader::span("a", "z"), max_results }.into()
    }

    #[test]
    fn scan_requires_positive_limit() {
        assert!(scan(0).validate().is_err());
        assert!(scan(-3).validate().is_err());
        assert!(scan(1).validate().is_ok());
    }

    #[test]
    fn scan_requires_end_key() {
        let req: Request = ScanRequest { header: RequestHeader::new("a"), max_results: 10 }.into();
        assert!(matches!(req.validate(), Err(CairnError::InvalidArgument(_))));
    }

    #[test]
    fn delete_range_bound() {
        let req: Request = DeleteRangeRequest {
            header: RequestHeader::span("a", "e"),
            max_entries_to_delete: -1,
        }
        .into();
        assert!(matches!(req.validate(), Err(CairnError::InvalidArgument(_))));
    }

    #[test]
    fn put_rejects_integer_value() {
        let req: Request = PutRequest { header: RequestHeader::new("k"), value: Value::Integer(1) }.into();
        assert!(matches!(req.validate(), Err(CairnError::ValueKindMismatch { .. })));
    }

    #[test]
    fn end_transaction_needs_txn_key() {
        let req: Request = EndTransactionRequest {
            header: RequestHeader::new("k"),
            commit: true,
            internal_commit_trigger: None,
        }
        .into();
        assert!(matches!(req.validate(), Err(CairnError::OpRequiresTxn { .. })));

        let txn = Transaction::new(
            "t",
            b"anchor".to_vec(),
            1,
            IsolationType::Serializable,
            Timestamp::new(1, 0),
            std::time::Duration::ZERO,
        );
        let req: Request = EndTransactionRequest {
            header: RequestHeader::new("k").with_txn(&txn),
            commit: true,
            internal_commit_trigger: None,
        }
        .into();
        assert!(req.validate().is_err());
        let req: Request = EndTransactionRequest {
            header: RequestHeader::new("anchor").with_txn(&txn),
            commit: true,
            internal_commit_trigger: None,
        }
        .into();
        assert!(req.validate().is_ok());
    }

    #[test]
    fn inconsistent_read_in_txn_rejected() {
        let txn = Transaction::new(
            "t",
            b"k".to_vec(),
            1,
            IsolationType::Snapshot,
            Timestamp::new(1, 0),
            std::time::Duration::ZERO,
        );
        let req: Request = GetRequest {
            header: RequestHeader::new("k")
                .with_txn(&txn)
                .with_consistency(ReadConsistency::Inconsistent),
        }
        .into();
        assert!(req.validate().is_err());
    }

    #[test]
    fn method_classes() {
        assert!(Method::Scan.is_read_only());
        assert!(Method::DeleteRange.is_write_only());
        assert!(!Method::EndTransaction.is_write_only());
        assert!(!Method::EndTransaction.is_read_only());
        assert!(Method::AdminMerge.is_admin());
    }
}
