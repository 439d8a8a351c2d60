//! Batch execution.
//!
//! Sub-requests inherit the unset fields of the batch header. A batch of
//! writes confined to one range runs atomically under that range's latch;
//! anything else fans out concurrently.

use futures::future::join_all;

use cairn_api::{BatchRequest, BatchResponse, Method, Request, RequestHeader, Response, ResponseUnion};
use cairn_consensus::ReplicaGroup;
use cairn_storage::{MvccEngine, UndoLog};
use cairn_types::{CairnError, ClientCmdId, RaftId, Transaction};

use crate::range::RangeState;
use crate::replay::Registration;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStrategy {
    /// Each sub-request runs independently; results are reported in order.
    Parallel,
    /// All sub-requests apply under one latch; the first failure rolls back
    /// every earlier write.
    Atomic,
}

impl BatchStrategy {
    /// `Atomic` when every request is write-only and `range_of` maps all of
    /// them to the same range.
    pub fn choose(requests: &[Request], range_of: impl Fn(&RequestHeader) -> Option<RaftId>) -> BatchStrategy {
        let mut ranges = requests
            .iter()
            .map(|r| if r.is_write_only() { range_of(r.header()) } else { None });
        match ranges.next() {
            Some(Some(first)) if ranges.all(|id| id == Some(first)) => BatchStrategy::Atomic,
            _ => BatchStrategy::Parallel,
        }
    }
}

/// Unpacks and validates every sub-request before anything executes.
pub(crate) fn prepare(batch: &BatchRequest) -> Result<Vec<Request>, CairnError> {
    let batch_id = batch.header.cmd_id.filter(|id| !id.is_empty());
    batch
        .requests
        .iter()
        .cloned()
        .enumerate()
        .map(|(i, union)| {
            let mut req = Request::try_from(union)?;
            let header = req.header_mut();
            header.inherit(&batch.header);
            if header.cmd_id.is_none() {
                header.cmd_id =
                    batch_id.map(|id| ClientCmdId::new(id.wall_time, id.random.wrapping_add(i as i64 + 1)));
            }
            req.validate()?;
            Ok(req)
        })
        .collect()
}

fn merge_txn(into: &mut Option<Transaction>, from: Option<&Transaction>) {
    match (into.as_mut(), from) {
        (Some(m), Some(t)) => m.update(t),
        (None, Some(t)) => *into = Some(t.clone()),
        _ => {}
    }
}

/// Folds sub-responses into a batch response: first error in request order,
/// newest timestamp, merged transaction.
fn assemble(header: &RequestHeader, responses: Vec<Response>) -> Response {
    let mut out = BatchResponse::default();
    let mut txn = header.txn.clone();
    for resp in responses {
        let h = resp.header();
        if out.header.error.is_none() {
            out.header.error = h.error.clone();
        }
        out.header.timestamp.forward(h.timestamp);
        merge_txn(&mut txn, h.txn.as_ref());
        out.responses.push(ResponseUnion::try_from(resp).unwrap_or_default());
    }
    out.header.txn = txn;
    Response::Batch(out)
}

impl<E: MvccEngine + 'static, G: ReplicaGroup> Store<E, G> {
    pub(crate) async fn execute_batch(&self, batch: BatchRequest) -> Response {
        let requests = match prepare(&batch) {
            Ok(r) => r,
            Err(e) => return Response::error_for(Method::Batch, e),
        };
        let strategy =
            BatchStrategy::choose(&requests, |h| self.route(&h.key, &h.end_key).map(|r| r.raft_id()));
        tracing::debug!(size = requests.len(), ?strategy, "executing batch");

        if strategy == BatchStrategy::Parallel {
            return self.execute_parallel(&batch.header, requests).await;
        }
        let mut attempt = 0;
        loop {
            match self.execute_atomic(&batch.header, &requests).await {
                Ok(resp) => return resp,
                Err(e) if attempt < self.config.routing_retries => {
                    attempt += 1;
                    tracing::debug!(attempt, error = %e, "re-routing atomic batch");
                    tokio::task::yield_now().await;
                }
                Err(e) => return Response::error_for(Method::Batch, e),
            }
        }
    }

    /// Runs everything but EndTransaction concurrently, then EndTransaction
    /// with the transaction as the other requests left it.
    async fn execute_parallel(&self, header: &RequestHeader, requests: Vec<Request>) -> Response {
        let mut slots: Vec<Option<Response>> = vec![None; requests.len()];
        let (deferred, immediate): (Vec<_>, Vec<_>) =
            requests.into_iter().enumerate().partition(|(_, r)| r.method() == Method::EndTransaction);

        let done = join_all(immediate.into_iter().map(|(i, req)| async move { (i, self.execute(req).await) })).await;
        let mut txn = header.txn.clone();
        let mut failed = false;
        for (i, resp) in done {
            merge_txn(&mut txn, resp.header().txn.as_ref());
            failed |= resp.error().is_some();
            slots[i] = Some(resp);
        }

        for (i, mut req) in deferred {
            let commit = matches!(&req, Request::EndTransaction(r) if r.commit);
            let resp = if failed && commit {
                Response::error_for(
                    Method::EndTransaction,
                    CairnError::NotExecuted("commit skipped after a failed request".into()),
                )
            } else {
                if let (Some(sub), Some(t)) = (req.header_mut().txn.as_mut(), txn.as_ref()) {
                    sub.update(t);
                }
                self.execute(req).await
            };
            merge_txn(&mut txn, resp.header().txn.as_ref());
            slots[i] = Some(resp);
        }
        assemble(header, slots.into_iter().flatten().collect())
    }

    /// Errors only when the batch no longer fits one range; nothing has run
    /// in that case.
    async fn execute_atomic(&self, header: &RequestHeader, requests: &[Request]) -> Result<Response, CairnError> {
        let first = requests
            .first()
            .ok_or_else(|| CairnError::InvalidArgument("empty atomic batch".into()))?
            .header();
        let range = self
            .route(&first.key, &first.end_key)
            .ok_or(CairnError::RangeNotFound { raft_id: header.raft_id })?;
        let mut state = range.lock().await;
        for req in requests {
            let h = req.header();
            state.check_span(&h.key, &h.end_key)?;
        }

        let cmd_id = header.cmd_id.filter(|id| !id.is_empty());
        let now = self.clock.physical_now();
        if let Some(id) = &cmd_id {
            match state.response_cache.register(id, now) {
                Ok(Registration::Cached(resp)) => return Ok(resp),
                Ok(Registration::Fresh) => {}
                Err(e) => return Ok(Response::error_for(Method::Batch, e)),
            }
        }
        let resp = self.apply_atomic(&mut state, header, requests).await;
        if let Some(id) = &cmd_id {
            if let Err(e) = state.response_cache.record(id, &resp, now) {
                tracing::warn!(error = %e, "failed to cache batch response");
            }
        }
        Ok(resp)
    }

    /// Runs every sub-request against an undo log.
    ///
    /// When one fails, all writes are rolled back together with the intents
    /// they added to the transaction record. Sub-responses before the failure
    /// keep the result they had before the rollback, so callers read a batch
    /// with a header error as having written nothing.
    async fn apply_atomic(&self, state: &mut RangeState, header: &RequestHeader, requests: &[Request]) -> Response {
        let undo = UndoLog::new(&self.engine);
        let txn_id = header.txn.as_ref().map(|t| t.id);
        let intents_before = txn_id.map(|id| self.txns.intents(&id));
        let mut txn = header.txn.clone();
        let mut failed_at = None;
        let mut out = Vec::with_capacity(requests.len());

        for (i, req) in requests.iter().cloned().enumerate() {
            if let Some(at) = failed_at {
                out.push(Response::error_for(
                    req.method(),
                    CairnError::NotExecuted(format!("request {at} of the batch failed")),
                ));
                continue;
            }
            let mut req = req;
            if let (Some(sub), Some(t)) = (req.header_mut().txn.as_mut(), txn.as_ref()) {
                sub.update(t);
            }
            let resp = self.apply_command(&undo, state, req).await;
            merge_txn(&mut txn, resp.header().txn.as_ref());
            if resp.error().is_some() {
                failed_at = Some(i);
            }
            out.push(resp);
        }

        if let Some(at) = failed_at {
            let touched = undo.touched();
            match undo.rollback() {
                Ok(()) => tracing::debug!(failed_at = at, touched, "atomic batch rolled back"),
                Err(e) => tracing::error!(error = %e, "atomic batch rollback failed"),
            }
            if let (Some(id), Some(intents)) = (txn_id, intents_before) {
                self.txns.restore_intents(&id, intents);
            }
        }
        assemble(header, out)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;

    use cairn_api::{
        ConditionalPutRequest, GetRequest, PutRequest, RequestUnion, ScanRequest,
    };
    use cairn_consensus::LocalGroup;
    use cairn_storage::MemEngine;
    use cairn_types::{IsolationType, Value, KEY_MAX};

    use super::*;
    use crate::store::StoreConfig;

    fn store() -> Store<MemEngine, LocalGroup> {
        let config = StoreConfig::new(1, 1, Duration::from_millis(250));
        Store::new(config, MemEngine::new(), LocalGroup::default()).unwrap()
    }

    fn put(key: &str, value: &str) -> RequestUnion {
        RequestUnion {
            put: Some(PutRequest { header: RequestHeader::new(key), value: Value::bytes(value) }),
            ..Default::default()
        }
    }

    fn cput(key: &str, value: &str, exp: Option<&str>) -> RequestUnion {
        RequestUnion {
            conditional_put: Some(ConditionalPutRequest {
                header: RequestHeader::new(key),
                value: Value::bytes(value),
                exp_value: exp.map(Value::bytes),
            }),
            ..Default::default()
        }
    }

    fn get(key: &str) -> Request {
        GetRequest { header: RequestHeader::new(key) }.into()
    }

    fn batch(requests: Vec<RequestUnion>) -> Request {
        BatchRequest { header: RequestHeader::new("a"), requests }.into()
    }

    async fn value(s: &Store<MemEngine, LocalGroup>, key: &str) -> Option<Value> {
        match s.execute(get(key)).await {
            Response::Get(r) => r.value,
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn strategy_selection() {
        let writes: Vec<Request> = vec![
            PutRequest { header: RequestHeader::new("a"), value: Value::bytes("1") }.into(),
            PutRequest { header: RequestHeader::new("b"), value: Value::bytes("2") }.into(),
        ];
        assert_eq!(BatchStrategy::choose(&writes, |_| Some(1)), BatchStrategy::Atomic);
        assert_eq!(
            BatchStrategy::choose(&writes, |h| Some(if h.key == b"a" { 1 } else { 2 })),
            BatchStrategy::Parallel
        );

        let mut mixed = writes.clone();
        mixed.push(get("c"));
        assert_eq!(BatchStrategy::choose(&mixed, |_| Some(1)), BatchStrategy::Parallel);
        assert_eq!(BatchStrategy::choose(&[], |_| Some(1)), BatchStrategy::Parallel);
    }

    #[tokio::test]
    async fn failing_cput_rolls_back_atomic_batch() {
        let s = store();
        let resp = s
            .execute(batch(vec![put("a", "1"), cput("b", "2", Some("nope")), put("c", "3")]))
            .await;
        let Response::Batch(b) = resp else { panic!("expected batch response") };

        assert_eq!(b.responses.len(), 3);
        assert!(matches!(b.header.error, Some(CairnError::ConditionFailed { actual_value: None })));
        assert!(b.responses[0].put.as_ref().is_some_and(|r| r.header.is_ok()));
        assert!(b.responses[1].conditional_put.as_ref().is_some_and(|r| r.header.error.is_some()));
        assert!(matches!(
            b.responses[2].put.as_ref().and_then(|r| r.header.error.clone()),
            Some(CairnError::NotExecuted(_))
        ));

        assert_eq!(value(&s, "a").await, None);
        assert_eq!(value(&s, "c").await, None);
    }

    #[tokio::test]
    async fn rolled_back_batch_drops_its_intents() {
        let s = store();
        let clock = s.clock();
        let txn = Transaction::new("t", b"z".to_vec(), 1, IsolationType::Snapshot, clock.now(), clock.max_offset());
        let first = PutRequest { header: RequestHeader::new("z").with_txn(&txn), value: Value::bytes("0") };
        let resp = s.execute(first.into()).await;
        assert!(resp.header().is_ok());
        let txn = resp.header().txn.clone().unwrap();

        let req = BatchRequest {
            header: RequestHeader::new("a").with_txn(&txn),
            requests: vec![put("a", "1"), cput("b", "2", Some("nope"))],
        };
        let resp = s.execute(req.into()).await;
        assert!(matches!(resp.error(), Some(CairnError::ConditionFailed { .. })));
        assert_eq!(s.txns().intents(&txn.id), BTreeSet::from([b"z".to_vec()]));
    }

    #[tokio::test]
    async fn atomic_batch_applies_all() {
        let s = store();
        let resp = s.execute(batch(vec![put("a", "1"), cput("b", "2", None), put("c", "3")])).await;
        assert!(resp.header().is_ok());
        assert_eq!(value(&s, "a").await, Some(Value::bytes("1")));
        assert_eq!(value(&s, "b").await, Some(Value::bytes("2")));
        assert_eq!(value(&s, "c").await, Some(Value::bytes("3")));
    }

    #[tokio::test]
    async fn parallel_batch_reports_in_order() {
        let s = Arc::new(store());
        s.execute(PutRequest { header: RequestHeader::new("x"), value: Value::bytes("1") }.into()).await;

        let scan = RequestUnion {
            scan: Some(ScanRequest { header: RequestHeader::span("a", KEY_MAX.to_vec()), max_results: 10 }),
            ..Default::default()
        };
        let get_x = RequestUnion::try_from(get("x")).unwrap();
        let resp = s.execute(batch(vec![get_x, put("y", "2"), scan])).await;
        let Response::Batch(b) = resp else { panic!("expected batch response") };

        assert!(b.header.error.is_none());
        assert_eq!(b.responses[0].get.as_ref().and_then(|r| r.value.clone()), Some(Value::bytes("1")));
        assert!(b.responses[1].put.is_some());
        assert!(b.responses[2].scan.is_some());
    }

    #[tokio::test]
    async fn malformed_union_rejected_before_execution() {
        let s = store();
        let mut two = put("a", "1");
        two.delete = Some(cairn_api::DeleteRequest { header: RequestHeader::new("a") });
        let resp = s.execute(batch(vec![put("z", "1"), two])).await;
        assert!(matches!(resp.error(), Some(CairnError::InvalidArgument(_))));
        assert_eq!(value(&s, "z").await, None);
    }

    #[tokio::test]
    async fn batch_replay_returns_cached_response() {
        let s = store();
        let id = ClientCmdId::new(1, 7);
        let req: Request = BatchRequest {
            header: RequestHeader::new("a").with_cmd_id(id),
            requests: vec![put("a", "1"), put("b", "2")],
        }
        .into();
        let first = s.execute(req.clone()).await;
        s.execute(PutRequest { header: RequestHeader::new("a"), value: Value::bytes("changed") }.into()).await;
        let second = s.execute(req).await;
        assert_eq!(first, second);
        assert_eq!(value(&s, "a").await, Some(Value::bytes("changed")));
    }

    #[test]
    fn sub_ids_derived_from_batch_id() {
        let b = BatchRequest {
            header: RequestHeader::new("a").with_cmd_id(ClientCmdId::new(5, 10)),
            requests: vec![put("a", "1"), put("b", "2")],
        };
        let reqs = prepare(&b).unwrap();
        assert_eq!(reqs[0].header().cmd_id, Some(ClientCmdId::new(5, 11)));
        assert_eq!(reqs[1].header().cmd_id, Some(ClientCmdId::new(5, 12)));
    }
}
