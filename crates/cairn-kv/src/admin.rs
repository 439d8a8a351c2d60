//! Range split and merge.
//!
//! Both run as ordinary snapshot transactions that rewrite the descriptor and
//! addressing records. The boundary change itself happens in the commit
//! trigger, under the affected ranges' latches.

use cairn_api::{
    AdminMergeRequest, AdminMergeResponse, AdminSplitRequest, AdminSplitResponse, DeleteRequest,
    EndTransactionRequest, InternalCommitTrigger, MergeTrigger, Method, PutRequest, Request,
    RequestHeader, Response, SplitTrigger,
};
use cairn_consensus::ReplicaGroup;
use cairn_storage::{keys, mvcc, MvccEngine};
use cairn_types::{CairnError, IsolationType, Key, RangeDescriptor, Transaction, Value, KEY_MAX};

use crate::encode;
use crate::store::Store;

fn desc_value(desc: &RangeDescriptor) -> Result<Option<Value>, CairnError> {
    Ok(Some(Value::Bytes(encode(desc)?)))
}

impl<E: MvccEngine + 'static, G: ReplicaGroup> Store<E, G> {
    pub(crate) async fn admin_split(&self, req: AdminSplitRequest) -> Response {
        match self.split_range(&req.header.key, &req.split_key).await {
            Ok(_) => Response::AdminSplit(AdminSplitResponse::default()),
            Err(e) => Response::error_for(Method::AdminSplit, e),
        }
    }

    pub(crate) async fn admin_merge(&self, req: AdminMergeRequest) -> Response {
        match self.merge_range(&req.header.key).await {
            Ok(_) => Response::AdminMerge(AdminMergeResponse::default()),
            Err(e) => Response::error_for(Method::AdminMerge, e),
        }
    }

    /// Splits the range containing `key` at `split_key`, or at its median
    /// live key when `split_key` is empty. Returns the new right-hand range.
    pub async fn split_range(&self, key: &[u8], split_key: &[u8]) -> Result<RangeDescriptor, CairnError> {
        let range = self.lookup(key).ok_or(CairnError::RangeNotFound { raft_id: 0 })?;
        let desc = range.descriptor().await;

        let split_key = if split_key.is_empty() {
            self.median_key(&desc)?
        } else {
            split_key.to_vec()
        };
        if !keys::is_user_key(&split_key) || split_key <= desc.start_key || !desc.contains_key(&split_key) {
            return Err(CairnError::InvalidArgument(format!(
                "split key {split_key:?} is not a user key inside range {}",
                desc.raft_id
            )));
        }

        let mut left = desc.clone();
        left.end_key = split_key.clone();
        let right = RangeDescriptor {
            raft_id: self.allocate_range_id(),
            start_key: split_key,
            end_key: desc.end_key.clone(),
            replicas: desc.replicas.clone(),
        };
        let writes = vec![
            (keys::range_descriptor_key(&left.start_key), desc_value(&left)?),
            (keys::range_descriptor_key(&right.start_key), desc_value(&right)?),
            (keys::range_meta_key(&left.end_key), desc_value(&left)?),
            (keys::range_meta_key(&right.end_key), desc_value(&right)?),
        ];
        let trigger = InternalCommitTrigger::Split(SplitTrigger { updated_desc: left, new_desc: right.clone() });
        self.run_admin_txn(format!("split range {}", desc.raft_id), desc.start_key.clone(), writes, trigger)
            .await?;
        Ok(right)
    }

    /// Merges the range containing `key` with its right neighbour. A range
    /// ending at the end of the key space is left as is.
    pub async fn merge_range(&self, key: &[u8]) -> Result<RangeDescriptor, CairnError> {
        let left_range = self.lookup(key).ok_or(CairnError::RangeNotFound { raft_id: 0 })?;
        let left = left_range.descriptor().await;
        if left.end_key.as_slice() == KEY_MAX {
            return Ok(left);
        }
        let right_range = self.lookup(&left.end_key).ok_or(CairnError::RangeNotFound { raft_id: 0 })?;
        let right = right_range.descriptor().await;
        if right.start_key != left.end_key {
            return Err(CairnError::InvalidArgument(format!(
                "ranges {} and {} are not adjacent",
                left.raft_id, right.raft_id
            )));
        }
        if right.replicas != left.replicas {
            return Err(CairnError::InvalidArgument(format!(
                "ranges {} and {} have different replicas",
                left.raft_id, right.raft_id
            )));
        }

        let mut merged = left.clone();
        merged.end_key = right.end_key.clone();
        let writes = vec![
            (keys::range_descriptor_key(&merged.start_key), desc_value(&merged)?),
            (keys::range_descriptor_key(&right.start_key), None),
            (keys::range_meta_key(&left.end_key), None),
            (keys::range_meta_key(&merged.end_key), desc_value(&merged)?),
        ];
        let trigger = InternalCommitTrigger::Merge(MergeTrigger {
            updated_desc: merged.clone(),
            subsumed_raft_id: right.raft_id,
        });
        self.run_admin_txn(format!("merge range {}", left.raft_id), left.start_key.clone(), writes, trigger)
            .await?;
        Ok(merged)
    }

    fn median_key(&self, desc: &RangeDescriptor) -> Result<Key, CairnError> {
        let start = desc.start_key.as_slice().max(keys::USER_KEY_MIN);
        let end = desc.end_key.as_slice().min(KEY_MAX);
        let live = if start < end { mvcc::live_keys(&self.engine, start, end)? } else { Vec::new() };
        if live.len() < 2 {
            return Err(CairnError::InvalidArgument(format!(
                "range {} has {} live keys; cannot pick a split key",
                desc.raft_id,
                live.len()
            )));
        }
        Ok(live[live.len() / 2].clone())
    }

    /// Writes (or, for `None`, deletes) every key in one transaction anchored
    /// at `anchor`, then commits it with `trigger`. Aborts on any failure.
    async fn run_admin_txn(
        &self,
        name: String,
        anchor: Key,
        writes: Vec<(Key, Option<Value>)>,
        trigger: InternalCommitTrigger,
    ) -> Result<(), CairnError> {
        let mut txn = Transaction::new(
            name,
            anchor,
            1,
            IsolationType::Snapshot,
            self.clock.now(),
            self.clock.max_offset(),
        );

        for (key, value) in writes {
            let header = RequestHeader::new(key).with_txn(&txn);
            let req: Request = match value {
                Some(value) => PutRequest { header, value }.into(),
                None => DeleteRequest { header }.into(),
            };
            let resp = self.execute(req).await;
            if let Some(t) = &resp.header().txn {
                txn.update(t);
            }
            if let Some(e) = resp.error() {
                let e = e.clone();
                self.abort_admin_txn(&txn, &e).await;
                return Err(e);
            }
        }

        let end = EndTransactionRequest {
            header: RequestHeader::new(txn.key.clone()).with_txn(&txn),
            commit: true,
            internal_commit_trigger: Some(trigger),
        };
        let resp = self.execute(end.into()).await;
        if let Some(e) = resp.error() {
            let e = e.clone();
            self.abort_admin_txn(&txn, &e).await;
            return Err(e);
        }
        Ok(())
    }

    async fn abort_admin_txn(&self, txn: &Transaction, cause: &CairnError) {
        tracing::warn!(txn = %txn.name, error = %cause, "aborting range administration");
        let end = EndTransactionRequest {
            header: RequestHeader::new(txn.key.clone()).with_txn(txn),
            commit: false,
            internal_commit_trigger: None,
        };
        if let Some(e) = self.execute(end.into()).await.error() {
            tracing::debug!(txn = %txn.name, error = %e, "abort after failed administration");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use cairn_api::GetRequest;
    use cairn_consensus::LocalGroup;
    use cairn_storage::MemEngine;
    use cairn_types::{ClientCmdId, TransactionStatus, KEY_MIN};

    use super::*;
    use crate::decode;
    use crate::store::StoreConfig;

    type TestStore = Store<MemEngine, LocalGroup>;

    fn store() -> Arc<TestStore> {
        let config = StoreConfig::new(1, 1, Duration::from_millis(250));
        Arc::new(Store::new(config, MemEngine::new(), LocalGroup::default()).unwrap())
    }

    async fn put(s: &TestStore, key: &str, value: &str) -> Response {
        s.execute(PutRequest { header: RequestHeader::new(key), value: Value::bytes(value) }.into()).await
    }

    fn stored_desc(s: &TestStore, key: Key) -> Option<RangeDescriptor> {
        let v = mvcc::get(s.engine(), &key, cairn_types::Timestamp::MAX, None, false).unwrap()?;
        Some(decode(v.as_bytes()?).unwrap())
    }

    #[tokio::test]
    async fn split_at_explicit_key() {
        let s = store();
        put(&s, "apple", "1").await;
        put(&s, "melon", "2").await;

        let right = s.split_range(b"apple", b"m").await.unwrap();
        assert_eq!(right.start_key, b"m");
        assert_eq!(right.end_key, KEY_MAX);

        let descs = s.descriptors().await;
        assert_eq!(descs.len(), 2);
        assert_eq!(descs[0].end_key, b"m");
        assert_eq!(s.lookup(b"melon").unwrap().raft_id(), right.raft_id);
        assert_eq!(s.lookup(b"apple").unwrap().raft_id(), 1);

        assert_eq!(stored_desc(&s, keys::range_descriptor_key(b"m")), Some(right.clone()));
        assert_eq!(stored_desc(&s, keys::range_meta_key(b"m")).map(|d| d.raft_id), Some(1));

        // Data on both sides remains readable through routing.
        let resp = s.execute(GetRequest { header: RequestHeader::new("melon") }.into()).await;
        let Response::Get(g) = resp else { panic!("expected get response") };
        assert_eq!(g.value, Some(Value::bytes("2")));
    }

    #[tokio::test]
    async fn split_key_must_be_inside_range() {
        let s = store();
        s.split_range(b"a", b"m").await.unwrap();
        assert!(matches!(s.split_range(b"a", b"m").await, Err(CairnError::InvalidArgument(_))));
        assert!(matches!(s.split_range(b"a", b"x").await, Err(CairnError::InvalidArgument(_))));
        assert!(matches!(s.split_range(b"a", b"\x00\x00desc").await, Err(CairnError::InvalidArgument(_))));
        assert_eq!(s.ranges().len(), 2);
    }

    #[tokio::test]
    async fn median_split() {
        let s = store();
        for k in ["a", "b", "c", "d"] {
            put(&s, k, "v").await;
        }
        let right = s.split_range(b"a", b"").await.unwrap();
        assert_eq!(right.start_key, b"c");

        let empty = store();
        put(&empty, "only", "v").await;
        assert!(matches!(empty.split_range(b"a", b"").await, Err(CairnError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn aborted_split_leaves_boundary() {
        let s = store();
        let desc = s.lookup(b"a").unwrap().descriptor().await;
        let mut left = desc.clone();
        left.end_key = b"m".to_vec();
        let right = RangeDescriptor { raft_id: 9, start_key: b"m".to_vec(), ..desc.clone() };
        let txn = Transaction::new(
            "split",
            KEY_MIN.to_vec(),
            1,
            IsolationType::Snapshot,
            s.clock().now(),
            Duration::ZERO,
        );
        let end = EndTransactionRequest {
            header: RequestHeader::new(KEY_MIN.to_vec()).with_txn(&txn),
            commit: false,
            internal_commit_trigger: Some(InternalCommitTrigger::Split(SplitTrigger {
                updated_desc: left,
                new_desc: right,
            })),
        };
        let resp = s.execute(end.into()).await;
        assert!(resp.header().is_ok());
        assert_eq!(resp.header().txn.as_ref().map(|t| t.status), Some(TransactionStatus::Aborted));
        assert_eq!(s.ranges().len(), 1);
        assert!(s.range_by_id(9).is_none());
    }

    #[tokio::test]
    async fn merge_of_last_range_is_noop() {
        let s = store();
        let resp = s.execute(AdminMergeRequest { header: RequestHeader::new("a") }.into()).await;
        assert!(resp.header().is_ok());
        assert_eq!(s.ranges().len(), 1);
        assert_eq!(s.descriptors().await[0].end_key, KEY_MAX);
    }

    #[tokio::test]
    async fn split_then_merge() {
        let s = store();
        put(&s, "k", "v").await;
        let right = s.split_range(b"a", b"m").await.unwrap();
        let merged = s.merge_range(b"a").await.unwrap();

        assert_eq!(merged.raft_id, 1);
        assert_eq!(merged.end_key, KEY_MAX);
        assert_eq!(s.ranges().len(), 1);
        assert!(s.range_by_id(right.raft_id).is_none());
        assert_eq!(s.lookup(b"zebra").unwrap().raft_id(), 1);
        assert_eq!(stored_desc(&s, keys::range_descriptor_key(b"m")), None);
        assert_eq!(stored_desc(&s, keys::range_meta_key(KEY_MAX)).map(|d| d.end_key), Some(KEY_MAX.to_vec()));
    }

    #[tokio::test]
    async fn subsumed_range_rejects_stale_commands() {
        let s = store();
        s.split_range(b"a", b"m").await.unwrap();
        let stale = s.lookup(b"q").unwrap();
        s.merge_range(b"a").await.unwrap();

        let state = stale.lock().await;
        assert!(state.subsumed);
        assert!(matches!(state.check_span(b"q", b""), Err(CairnError::RangeNotFound { .. })));
        drop(state);

        // Routing moves on to the merged range.
        let resp = put(&s, "q", "1").await;
        assert!(resp.header().is_ok());
    }

    #[tokio::test]
    async fn split_copies_replay_history() {
        let s = store();
        let id = ClientCmdId::new(1, 1);
        let req: Request =
            PutRequest { header: RequestHeader::new("x").with_cmd_id(id), value: Value::bytes("1") }.into();
        let first = s.execute(req.clone()).await;

        s.split_range(b"a", b"m").await.unwrap();
        put(&s, "x", "2").await;
        let again = s.execute(req).await;
        assert_eq!(first, again);
    }

    #[tokio::test]
    async fn admin_request_envelopes() {
        let s = store();
        let resp = s
            .execute(AdminSplitRequest { header: RequestHeader::new("a"), split_key: b"q".to_vec() }.into())
            .await;
        assert!(resp.header().is_ok());
        assert_eq!(s.ranges().len(), 2);

        let resp = s.execute(AdminSplitRequest { header: RequestHeader::new("a"), split_key: vec![] }.into()).await;
        assert!(matches!(resp.error(), Some(CairnError::InvalidArgument(_))));
    }
}
