use cairn_types::{
    CairnError, ClientCmdId, Key, RaftId, ReadConsistency, ReplicaDescriptor, Timestamp,
    Transaction, KEY_MAX,
};

/// Metadata carried by every request.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RequestHeader {
    /// Zero means "use the server's clock".
    pub timestamp: Timestamp,
    /// `None` requests no replay protection.
    pub cmd_id: Option<ClientCmdId>,
    pub key: Key,
    /// Empty for single-key operations.
    pub end_key: Key,
    pub user: String,
    pub replica: ReplicaDescriptor,
    pub raft_id: RaftId,
    /// Ignored when `txn` is set.
    pub user_priority: i32,
    pub txn: Option<Transaction>,
    pub read_consistency: ReadConsistency,
}

impl Default for RequestHeader {
    fn default() -> Self {
        RequestHeader {
            timestamp: Timestamp::ZERO,
            cmd_id: None,
            key: Key::new(),
            end_key: Key::new(),
            user: String::new(),
            replica: ReplicaDescriptor::default(),
            raft_id: 0,
            user_priority: 1,
            txn: None,
            read_consistency: ReadConsistency::Consistent,
        }
    }
}

impl RequestHeader {
    pub fn new(key: impl Into<Key>) -> Self {
        RequestHeader { key: key.into(), ..Default::default() }
    }

    pub fn span(key: impl Into<Key>, end_key: impl Into<Key>) -> Self {
        RequestHeader { key: key.into(), end_key: end_key.into(), ..Default::default() }
    }

    pub fn with_txn(mut self, txn: &Transaction) -> Self {
        self.txn = Some(txn.clone());
        self
    }

    pub fn with_cmd_id(mut self, cmd_id: ClientCmdId) -> Self {
        self.cmd_id = Some(cmd_id);
        self
    }

    pub fn with_consistency(mut self, consistency: ReadConsistency) -> Self {
        self.read_consistency = consistency;
        self
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_range(&self) -> bool {
        !self.end_key.is_empty()
    }

    /// Checks the fields every operation shares.
    pub fn validate(&self) -> Result<(), CairnError> {
        if self.key.as_slice() >= KEY_MAX {
            return Err(CairnError::InvalidArgument(format!(
                "key {:?} is not below the end of the key space",
                self.key
            )));
        }
        if self.is_range() {
            if self.end_key <= self.key {
                return Err(CairnError::InvalidArgument(format!(
                    "end key {:?} must be greater than start key {:?}",
                    self.end_key, self.key
                )));
            }
            if self.end_key.as_slice() > KEY_MAX {
                return Err(CairnError::InvalidArgument(format!(
                    "end key {:?} is beyond the end of the key space",
                    self.end_key
                )));
            }
        }
        if self.txn.is_none() && self.user_priority < 1 {
            return Err(CairnError::InvalidArgument(format!(
                "user priority must be positive, got {}",
                self.user_priority
            )));
        }
        Ok(())
    }

    /// Fills fields left unset from a batch's header.
    pub fn inherit(&mut self, batch: &RequestHeader) {
        if self.timestamp.is_zero() {
            self.timestamp = batch.timestamp;
        }
        if self.txn.is_none() {
            self.txn = batch.txn.clone();
        }
        if self.user.is_empty() {
            self.user = batch.user.clone();
        }
        if self.user_priority == 1 {
            self.user_priority = batch.user_priority;
        }
        if self.read_consistency == ReadConsistency::Consistent {
            self.read_consistency = batch.read_consistency;
        }
        if self.replica == ReplicaDescriptor::default() {
            self.replica = batch.replica;
        }
        if self.raft_id == 0 {
            self.raft_id = batch.raft_id;
        }
    }
}

/// Metadata carried by every response.
///
/// When `error` is set the response's data fields are not meaningful, except
/// where an operation documents otherwise.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResponseHeader {
    pub error: Option<CairnError>,
    /// Timestamp the operation actually executed at.
    pub timestamp: Timestamp,
    pub txn: Option<Transaction>,
}

impl ResponseHeader {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn set_error(&mut self, err: CairnError) {
        self.error = Some(err);
    }

    pub fn result(&self) -> Result<(), CairnError> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}
