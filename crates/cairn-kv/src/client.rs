//! Client-side helpers: typed single operations and transactions that
//! restart themselves on retryable conflicts.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use cairn_api::{
    ConditionalPutRequest, ContainsRequest, DeleteRangeRequest, DeleteRequest, EndTransactionRequest,
    EndTransactionResponse, GetRequest, IncrementRequest, PutRequest, Request, RequestHeader, Response,
    ScanRequest,
};
use cairn_consensus::ReplicaGroup;
use cairn_storage::MvccEngine;
use cairn_types::{CairnError, ClientCmdId, IsolationType, Key, KeyValue, Transaction, Value};

use crate::store::Store;

/// Extracts the expected response variant, surfacing its header error.
macro_rules! unpack {
    ($resp:expr, $variant:ident) => {
        match $resp {
            Response::$variant(r) => {
                r.header.result()?;
                r
            }
            other => {
                return Err(CairnError::Storage(format!(
                    "expected {} response, got {}",
                    stringify!($variant),
                    other.method()
                )))
            }
        }
    };
}

pub struct KvClient<E, G> {
    store: Arc<Store<E, G>>,
    user_priority: i32,
    max_attempts: usize,
}

impl<E, G> Clone for KvClient<E, G> {
    fn clone(&self) -> Self {
        KvClient { store: self.store.clone(), user_priority: self.user_priority, max_attempts: self.max_attempts }
    }
}

impl<E: MvccEngine + 'static, G: ReplicaGroup> KvClient<E, G> {
    pub fn new(store: Arc<Store<E, G>>) -> Self {
        KvClient { store, user_priority: 1, max_attempts: 10 }
    }

    /// Priority for this client's requests and transactions; must be at least 1.
    /// [`MAX_USER_PRIORITY`](cairn_types::MAX_USER_PRIORITY) wins every conflict.
    pub fn with_user_priority(mut self, user_priority: i32) -> Self {
        self.user_priority = user_priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn store(&self) -> &Arc<Store<E, G>> {
        &self.store
    }

    /// Sends a request, stamping a command id and this client's priority
    /// where the request leaves them unset.
    pub async fn send(&self, mut req: Request) -> Response {
        let header = req.header_mut();
        if header.cmd_id.is_none() {
            header.cmd_id = Some(ClientCmdId::generate(self.store.clock().physical_now()));
        }
        if header.txn.is_none() && header.user_priority == RequestHeader::default().user_priority {
            header.user_priority = self.user_priority;
        }
        self.store.execute(req).await
    }

    pub async fn get(&self, key: impl Into<Key>) -> Result<Option<Value>, CairnError> {
        let r = unpack!(self.send(GetRequest { header: RequestHeader::new(key) }.into()).await, Get);
        Ok(r.value)
    }

    pub async fn contains(&self, key: impl Into<Key>) -> Result<bool, CairnError> {
        let r = unpack!(self.send(ContainsRequest { header: RequestHeader::new(key) }.into()).await, Contains);
        Ok(r.exists)
    }

    pub async fn put(&self, key: impl Into<Key>, value: Value) -> Result<(), CairnError> {
        unpack!(self.send(PutRequest { header: RequestHeader::new(key), value }.into()).await, Put);
        Ok(())
    }

    pub async fn conditional_put(
        &self,
        key: impl Into<Key>,
        value: Value,
        exp_value: Option<Value>,
    ) -> Result<(), CairnError> {
        let req = ConditionalPutRequest { header: RequestHeader::new(key), value, exp_value };
        unpack!(self.send(req.into()).await, ConditionalPut);
        Ok(())
    }

    pub async fn increment(&self, key: impl Into<Key>, increment: i64) -> Result<i64, CairnError> {
        let req = IncrementRequest { header: RequestHeader::new(key), increment };
        Ok(unpack!(self.send(req.into()).await, Increment).new_value)
    }

    pub async fn delete(&self, key: impl Into<Key>) -> Result<(), CairnError> {
        unpack!(self.send(DeleteRequest { header: RequestHeader::new(key) }.into()).await, Delete);
        Ok(())
    }

    /// Deletes up to `max` keys of `[start, end)`; `0` deletes them all.
    pub async fn delete_range(&self, start: impl Into<Key>, end: impl Into<Key>, max: i64) -> Result<i64, CairnError> {
        let req = DeleteRangeRequest { header: RequestHeader::span(start, end), max_entries_to_delete: max };
        Ok(unpack!(self.send(req.into()).await, DeleteRange).num_deleted)
    }

    pub async fn scan(&self, start: impl Into<Key>, end: impl Into<Key>, max: i64) -> Result<Vec<KeyValue>, CairnError> {
        let req = ScanRequest { header: RequestHeader::span(start, end), max_results: max };
        Ok(unpack!(self.send(req.into()).await, Scan).rows)
    }

    pub fn begin(&self, name: &str, key: impl Into<Key>, isolation: IsolationType) -> TxnHandle<E, G> {
        let clock = self.store.clock();
        let txn = Transaction::new(name, key.into(), self.user_priority, isolation, clock.now(), clock.max_offset());
        TxnHandle { client: self.clone(), txn }
    }

    /// Runs `f` in a transaction and commits it, restarting on conflicts up
    /// to the client's attempt limit. Any other error aborts the transaction.
    pub async fn run<T, F>(&self, name: &str, key: impl Into<Key>, isolation: IsolationType, mut f: F) -> Result<T, CairnError>
    where
        F: for<'a> FnMut(&'a mut TxnHandle<E, G>) -> BoxFuture<'a, Result<T, CairnError>>,
    {
        let mut txn = self.begin(name, key, isolation);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match f(&mut txn).await {
                Ok(v) => txn.commit().await.map(|_| v),
                Err(e) => Err(e),
            };
            match result {
                Ok(v) => return Ok(v),
                Err(e) if e.requires_txn_restart() && attempt < self.max_attempts => {
                    tracing::debug!(txn = %txn.txn.name, attempt, error = %e, "restarting transaction");
                    txn.restart_for(&e);
                }
                Err(e) => {
                    if let Err(abort) = txn.abort().await {
                        tracing::debug!(txn = %txn.txn.name, error = %abort, "abort failed");
                    }
                    return Err(e);
                }
            }
        }
    }
}

/// An open transaction. Every response folds its view of the transaction
/// back into the handle.
pub struct TxnHandle<E, G> {
    client: KvClient<E, G>,
    txn: Transaction,
}

impl<E: MvccEngine + 'static, G: ReplicaGroup> TxnHandle<E, G> {
    pub fn txn(&self) -> &Transaction {
        &self.txn
    }

    async fn send(&mut self, mut req: Request) -> Response {
        req.header_mut().txn = Some(self.txn.clone());
        let resp = self.client.send(req).await;
        if let Some(t) = &resp.header().txn {
            self.txn.update(t);
        }
        resp
    }

    pub async fn get(&mut self, key: impl Into<Key>) -> Result<Option<Value>, CairnError> {
        let r = unpack!(self.send(GetRequest { header: RequestHeader::new(key) }.into()).await, Get);
        Ok(r.value)
    }

    pub async fn put(&mut self, key: impl Into<Key>, value: Value) -> Result<(), CairnError> {
        unpack!(self.send(PutRequest { header: RequestHeader::new(key), value }.into()).await, Put);
        Ok(())
    }

    pub async fn conditional_put(
        &mut self,
        key: impl Into<Key>,
        value: Value,
        exp_value: Option<Value>,
    ) -> Result<(), CairnError> {
        let req = ConditionalPutRequest { header: RequestHeader::new(key), value, exp_value };
        unpack!(self.send(req.into()).await, ConditionalPut);
        Ok(())
    }

    pub async fn increment(&mut self, key: impl Into<Key>, increment: i64) -> Result<i64, CairnError> {
        let req = IncrementRequest { header: RequestHeader::new(key), increment };
        Ok(unpack!(self.send(req.into()).await, Increment).new_value)
    }

    pub async fn delete(&mut self, key: impl Into<Key>) -> Result<(), CairnError> {
        unpack!(self.send(DeleteRequest { header: RequestHeader::new(key) }.into()).await, Delete);
        Ok(())
    }

    pub async fn delete_range(&mut self, start: impl Into<Key>, end: impl Into<Key>, max: i64) -> Result<i64, CairnError> {
        let req = DeleteRangeRequest { header: RequestHeader::span(start, end), max_entries_to_delete: max };
        Ok(unpack!(self.send(req.into()).await, DeleteRange).num_deleted)
    }

    pub async fn scan(&mut self, start: impl Into<Key>, end: impl Into<Key>, max: i64) -> Result<Vec<KeyValue>, CairnError> {
        let req = ScanRequest { header: RequestHeader::span(start, end), max_results: max };
        Ok(unpack!(self.send(req.into()).await, Scan).rows)
    }

    async fn end(&mut self, commit: bool) -> Result<EndTransactionResponse, CairnError> {
        let req = EndTransactionRequest {
            header: RequestHeader::new(self.txn.key.clone()),
            commit,
            internal_commit_trigger: None,
        };
        Ok(unpack!(self.send(req.into()).await, EndTransaction))
    }

    /// Commits and then waits out `commit_wait`, so that no later reader
    /// anywhere can be assigned a timestamp below the commit.
    pub async fn commit(&mut self) -> Result<(), CairnError> {
        let resp = self.end(true).await?;
        if resp.commit_wait > 0 {
            tokio::time::sleep(Duration::from_nanos(resp.commit_wait as u64)).await;
        }
        Ok(())
    }

    pub async fn abort(&mut self) -> Result<(), CairnError> {
        self.end(false).await.map(|_| ())
    }

    /// Prepares the next attempt after a conflict.
    pub fn restart_for(&mut self, err: &CairnError) {
        let user_priority = self.client.user_priority;
        match err {
            CairnError::WriteIntent { priority, .. } => {
                let ts = self.txn.timestamp;
                self.txn.restart(user_priority, *priority, ts);
            }
            CairnError::TransactionRetry { timestamp, .. } => {
                self.txn.restart(user_priority, 0, *timestamp);
            }
            CairnError::ReadWithinUncertaintyInterval { existing_timestamp, .. } => {
                self.txn.restart(user_priority, 0, existing_timestamp.next());
            }
            CairnError::TransactionAborted { priority, .. } => {
                // The aborted record is final; continue under a fresh id.
                let clock = self.client.store.clock();
                let mut fresh = Transaction::new(
                    self.txn.name.clone(),
                    self.txn.key.clone(),
                    user_priority,
                    self.txn.isolation,
                    clock.now(),
                    clock.max_offset(),
                );
                fresh.upgrade_priority(*priority);
                self.txn = fresh;
            }
            _ => {}
        }
    }
}
