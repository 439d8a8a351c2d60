use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;

use cairn_api::{
    ConditionalPutResponse, ContainsResponse, DeleteRangeResponse, DeleteResponse,
    EndTransactionRequest, EndTransactionResponse, GetResponse, IncrementResponse,
    InternalCommitTrigger, MergeTrigger, PutResponse, Request, Response, ScanResponse,
    SplitTrigger,
};
use cairn_consensus::ReplicaGroup;
use cairn_storage::{keys, mvcc, IntentResolution, MvccEngine, MvccStats};
use cairn_types::{
    CairnError, ErrorKind, Key, NodeId, RaftId, RangeDescriptor, ReplicaDescriptor, StoreId,
    Timestamp, Transaction, TransactionStatus, Value, KEY_MAX, KEY_MIN,
};

use crate::clock::Clock;
use crate::consistency::ReadPolicy;
use crate::encode;
use crate::range::{Range, RangeState};
use crate::replay::Registration;
use crate::txn::{PushKind, PushOutcome, Pusher, TxnTable};

/// Default replay window for client command ids.
pub const DEFAULT_REPLAY_WINDOW: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub node_id: NodeId,
    pub store_id: StoreId,
    /// Upper bound on clock skew between nodes.
    pub max_offset: Duration,
    pub replay_window: Duration,
    /// Age after which read timestamps fold into the low-water mark.
    pub ts_cache_window: Duration,
    /// Re-routing attempts after a range boundary change.
    pub routing_retries: usize,
    /// Pushes attempted on one command before its conflict is reported.
    pub push_retries: usize,
}

impl StoreConfig {
    pub fn new(node_id: NodeId, store_id: StoreId, max_offset: Duration) -> Self {
        StoreConfig {
            node_id,
            store_id,
            max_offset,
            replay_window: DEFAULT_REPLAY_WINDOW,
            ts_cache_window: Duration::from_secs(10),
            routing_retries: 8,
            push_retries: 16,
        }
    }
}

/// Ranges indexed by end key: the range owning `key` is the first whose end
/// key sorts after it.
#[derive(Default)]
struct RangeMap {
    by_end: BTreeMap<Key, Arc<Range>>,
    by_id: HashMap<RaftId, Arc<Range>>,
}

impl RangeMap {
    fn insert(&mut self, end_key: Key, range: Arc<Range>) {
        self.by_id.insert(range.raft_id(), range.clone());
        self.by_end.insert(end_key, range);
    }

    fn entry_for(&self, key: &[u8]) -> Option<(&Key, &Arc<Range>)> {
        self.by_end.range::<[u8], _>((Bound::Excluded(key), Bound::Unbounded)).next()
    }
}

/// Counts of what one [`Store::gc`] pass evicted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    pub responses: usize,
    pub reads: usize,
    pub txns: usize,
}

/// Per-command execution context.
struct Ctx {
    ts: Timestamp,
    txn: Option<Transaction>,
    pusher: Pusher,
}

impl Ctx {
    fn txn_id(&self) -> Option<uuid::Uuid> {
        self.txn.as_ref().map(|t| t.id)
    }

    /// Moves the command (and its transaction) to the timestamp a write landed at.
    fn wrote(&mut self, written: Timestamp) {
        self.ts.forward(written);
        if let Some(t) = self.txn.as_mut() {
            t.timestamp.forward(written);
        }
    }
}

pub(crate) enum PreparedTrigger {
    Split { trigger: SplitTrigger, left_stats: MvccStats, right_stats: MvccStats },
    Merge { trigger: MergeTrigger, stats: MvccStats },
}

/// All ranges of one store and the machinery to run commands against them.
pub struct Store<E, G> {
    pub(crate) config: StoreConfig,
    pub(crate) engine: E,
    pub(crate) group: G,
    pub(crate) clock: Clock,
    pub(crate) txns: TxnTable,
    ranges: RwLock<RangeMap>,
    next_range_id: AtomicU64,
}

impl<E: MvccEngine + 'static, G: ReplicaGroup> Store<E, G> {
    pub fn new(config: StoreConfig, engine: E, group: G) -> Result<Self, CairnError> {
        let clock = Clock::system(config.max_offset);
        Self::with_clock(config, engine, group, clock)
    }

    /// Bootstraps a store holding a single range over the whole key space.
    pub fn with_clock(config: StoreConfig, engine: E, group: G, clock: Clock) -> Result<Self, CairnError> {
        let desc = RangeDescriptor {
            raft_id: 1,
            start_key: KEY_MIN.to_vec(),
            end_key: KEY_MAX.to_vec(),
            replicas: vec![ReplicaDescriptor { node_id: config.node_id, store_id: config.store_id }],
        };
        let now = clock.now();
        let encoded = Value::Bytes(encode(&desc)?);
        mvcc::put(&engine, &keys::range_descriptor_key(&desc.start_key), now, None, Some(encoded.clone()))?;
        mvcc::put(&engine, &keys::range_meta_key(&desc.end_key), now, None, Some(encoded))?;

        let mut state = RangeState::new(desc.clone(), config.replay_window, Timestamp::ZERO);
        state.stats = mvcc::stats(&engine, &desc.start_key, &desc.end_key)?;
        let mut map = RangeMap::default();
        map.insert(desc.end_key.clone(), Arc::new(Range::new(state)));

        tracing::info!(node_id = config.node_id, store_id = config.store_id, "store bootstrapped");
        Ok(Store {
            config,
            engine,
            group,
            clock,
            txns: TxnTable::new(),
            ranges: RwLock::new(map),
            next_range_id: AtomicU64::new(2),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn group(&self) -> &G {
        &self.group
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn txns(&self) -> &TxnTable {
        &self.txns
    }

    pub fn allocate_range_id(&self) -> RaftId {
        self.next_range_id.fetch_add(1, Ordering::SeqCst)
    }

    /// The range whose span contains `key`.
    pub fn lookup(&self, key: &[u8]) -> Option<Arc<Range>> {
        self.ranges.read().entry_for(key).map(|(_, r)| r.clone())
    }

    /// The range containing all of `[key, end_key)`, if a single one does.
    pub fn route(&self, key: &[u8], end_key: &[u8]) -> Option<Arc<Range>> {
        let map = self.ranges.read();
        let (range_end, range) = map.entry_for(key)?;
        if !end_key.is_empty() && end_key > range_end.as_slice() {
            return None;
        }
        Some(range.clone())
    }

    pub fn range_by_id(&self, raft_id: RaftId) -> Option<Arc<Range>> {
        self.ranges.read().by_id.get(&raft_id).cloned()
    }

    /// All ranges in key order.
    pub fn ranges(&self) -> Vec<Arc<Range>> {
        self.ranges.read().by_end.values().cloned().collect()
    }

    pub async fn descriptors(&self) -> Vec<RangeDescriptor> {
        let mut out = Vec::new();
        for range in self.ranges() {
            out.push(range.descriptor().await);
        }
        out
    }

    /// Executes one request. Never fails at the call level: errors travel in
    /// the response header.
    pub fn execute(&self, req: Request) -> BoxFuture<'_, Response> {
        async move {
            let method = req.method();
            if let Err(e) = req.validate() {
                return Response::error_for(method, e);
            }
            match req {
                Request::Batch(b) => self.execute_batch(b).await,
                Request::AdminSplit(r) => self.admin_split(r).await,
                Request::AdminMerge(r) => self.admin_merge(r).await,
                other => self.execute_routed(other).await,
            }
        }
        .boxed()
    }

    async fn execute_routed(&self, req: Request) -> Response {
        let method = req.method();
        let mut attempt = 0;
        loop {
            let resp = self.execute_once(req.clone()).await;
            match resp.error() {
                Some(e) if e.kind() == ErrorKind::Routing && attempt < self.config.routing_retries => {
                    attempt += 1;
                    tracing::debug!(method = %method, attempt, error = %e, "re-routing after range change");
                    tokio::task::yield_now().await;
                }
                _ => return resp,
            }
        }
    }

    async fn execute_once(&self, req: Request) -> Response {
        let method = req.method();
        let header = req.header();
        let Some(range) = self.lookup(&header.key) else {
            return Response::error_for(method, CairnError::RangeNotFound { raft_id: header.raft_id });
        };
        let mut state = range.lock().await;
        if let Err(e) = state.check_span(&header.key, &header.end_key) {
            return Response::error_for(method, e);
        }
        self.execute_locked(&self.engine, &mut state, req).await
    }

    /// Runs `req` on a range whose latch is held, under replay protection.
    pub(crate) async fn execute_locked<M: MvccEngine + ?Sized>(
        &self,
        engine: &M,
        state: &mut RangeState,
        req: Request,
    ) -> Response {
        let method = req.method();
        let cmd_id = req.header().cmd_id.filter(|id| !id.is_empty());
        let now = self.clock.physical_now();

        if let Some(id) = &cmd_id {
            match state.response_cache.register(id, now) {
                Ok(Registration::Cached(resp)) => {
                    tracing::debug!(method = %method, raft_id = state.desc.raft_id, "replaying cached response");
                    return resp;
                }
                Ok(Registration::Fresh) => {}
                Err(e) => return Response::error_for(method, e),
            }
        }

        let resp = self.apply_command(engine, state, req).await;

        if let Some(id) = &cmd_id {
            if let Err(e) = state.response_cache.record(id, &resp, now) {
                tracing::warn!(method = %method, error = %e, "failed to cache response");
            }
        }
        resp
    }

    pub(crate) async fn apply_command<M: MvccEngine + ?Sized>(
        &self,
        engine: &M,
        state: &mut RangeState,
        req: Request,
    ) -> Response {
        let mut resp = Response::new_for(req.method());
        if let Err(e) = self.apply(engine, state, req, &mut resp).await {
            resp.header_mut().set_error(e);
        }
        resp
    }

    async fn apply<M: MvccEngine + ?Sized>(
        &self,
        engine: &M,
        state: &mut RangeState,
        req: Request,
        resp: &mut Response,
    ) -> Result<(), CairnError> {
        let method = req.method();
        let header = req.header().clone();
        let policy = ReadPolicy::resolve(&header, method.is_read_only())?;

        if policy.requires_lease() && !self.group.has_lease(&state.desc).await? {
            return Err(CairnError::NotLeaseHolder { raft_id: state.desc.raft_id });
        }
        if policy.requires_quorum() {
            self.group.confirm_quorum(&state.desc).await?;
        }

        let txn = match &header.txn {
            Some(t) => Some(self.txns.refresh(t)?),
            None => None,
        };
        let ts = match &txn {
            Some(t) => {
                self.clock.update(t.timestamp);
                t.timestamp
            }
            None if header.timestamp.is_zero() => self.clock.now(),
            None => {
                self.clock.update(header.timestamp);
                header.timestamp
            }
        };
        let pusher = match &txn {
            Some(t) => Pusher::for_txn(t),
            None => Pusher::non_txn(header.user_priority, ts),
        };
        let mut ctx = Ctx { ts, txn, pusher };
        let key = header.key.as_slice();
        let end = header.end_key.as_slice();

        if method.is_read_only() {
            let observe = policy.observes_intents();
            let read = PushKind::Timestamp(ctx.ts);
            *resp = match req {
                Request::Contains(_) => {
                    let v = self.with_conflicts(&ctx, read, || {
                        mvcc::get(engine, key, ctx.ts, ctx.txn.as_ref(), observe)
                    })?;
                    Response::Contains(ContainsResponse { exists: v.is_some(), ..Default::default() })
                }
                Request::Get(_) => {
                    let value = self.with_conflicts(&ctx, read, || {
                        mvcc::get(engine, key, ctx.ts, ctx.txn.as_ref(), observe)
                    })?;
                    Response::Get(GetResponse { value, ..Default::default() })
                }
                Request::Scan(r) => {
                    let max = usize::try_from(r.max_results).unwrap_or(usize::MAX);
                    let rows = self.with_conflicts(&ctx, read, || {
                        mvcc::scan(engine, key, end, max, ctx.ts, ctx.txn.as_ref(), observe)
                    })?;
                    Response::Scan(ScanResponse { rows, ..Default::default() })
                }
                other => {
                    return Err(CairnError::InvalidArgument(format!("{} is not a read", other.method())))
                }
            };
            if policy != ReadPolicy::StaleRead {
                state.ts_cache.add(key, end, ctx.ts, ctx.txn_id());
            }
        } else if method.is_write_only() {
            let floor = state.ts_cache.latest_read(key, end, ctx.txn_id());
            if floor >= ctx.ts {
                ctx.ts = floor.next();
            }
            if let Some(t) = ctx.txn.as_mut() {
                t.timestamp.forward(ctx.ts);
                *t = self.txns.begin_write(t)?;
                ctx.ts = t.timestamp;
            }
            *resp = self.apply_write(engine, &mut ctx, req, resp)?;
        } else if let Request::EndTransaction(r) = req {
            let Some(txn) = ctx.txn.take() else {
                return Err(CairnError::OpRequiresTxn { method: method.to_string() });
            };
            let (fin, end_resp) = self.end_transaction(state, r, txn).await?;
            ctx.ts = fin.timestamp;
            ctx.txn = Some(fin);
            *resp = Response::EndTransaction(end_resp);
        } else {
            return Err(CairnError::InvalidArgument(format!("{method} cannot run on a range")));
        }

        let h = resp.header_mut();
        h.timestamp = ctx.ts;
        h.txn = ctx.txn;
        Ok(())
    }

    fn apply_write<M: MvccEngine + ?Sized>(
        &self,
        engine: &M,
        ctx: &mut Ctx,
        req: Request,
        resp: &mut Response,
    ) -> Result<Response, CairnError> {
        let key = req.header().key.clone();
        let abort = PushKind::Abort;
        let out = match req {
            Request::Put(r) => {
                let written = self.with_conflicts(ctx, abort, || {
                    let current = mvcc::current_for_write(engine, &key, ctx.txn.as_ref())?;
                    check_not_integer(&key, current.as_ref())?;
                    mvcc::put(engine, &key, ctx.ts, ctx.txn.as_ref(), Some(r.value.clone()))
                })?;
                ctx.wrote(written);
                Response::Put(PutResponse::default())
            }
            Request::ConditionalPut(r) => {
                let outcome = self.with_conflicts(ctx, abort, || {
                    let current = mvcc::current_for_write(engine, &key, ctx.txn.as_ref())?;
                    check_not_integer(&key, current.as_ref())?;
                    let matches = match (&current, &r.exp_value) {
                        (None, None) => true,
                        (Some(cur), Some(exp)) => cur == exp,
                        _ => false,
                    };
                    if !matches {
                        return Ok(Err(current));
                    }
                    mvcc::put(engine, &key, ctx.ts, ctx.txn.as_ref(), Some(r.value.clone())).map(Ok)
                })?;
                match outcome {
                    Ok(written) => ctx.wrote(written),
                    Err(actual_value) => {
                        *resp = Response::ConditionalPut(ConditionalPutResponse {
                            actual_value: actual_value.clone(),
                            ..Default::default()
                        });
                        return Err(CairnError::ConditionFailed { actual_value });
                    }
                }
                Response::ConditionalPut(ConditionalPutResponse::default())
            }
            Request::Increment(r) => {
                let (new_value, written) = self.with_conflicts(ctx, abort, || {
                    let base = match mvcc::current_for_write(engine, &key, ctx.txn.as_ref())? {
                        None => 0,
                        Some(Value::Integer(i)) => i,
                        Some(Value::Bytes(_)) => {
                            return Err(CairnError::ValueKindMismatch {
                                key: key.clone(),
                                reason: "value is not an integer".into(),
                            })
                        }
                    };
                    let new_value = base.checked_add(r.increment).ok_or_else(|| {
                        CairnError::InvalidArgument(format!("increment overflows: {base} + {}", r.increment))
                    })?;
                    let written =
                        mvcc::put(engine, &key, ctx.ts, ctx.txn.as_ref(), Some(Value::Integer(new_value)))?;
                    Ok((new_value, written))
                })?;
                ctx.wrote(written);
                Response::Increment(IncrementResponse { new_value, ..Default::default() })
            }
            Request::Delete(_) => {
                let written = self.with_conflicts(ctx, abort, || {
                    mvcc::delete(engine, &key, ctx.ts, ctx.txn.as_ref())
                })?;
                ctx.wrote(written);
                Response::Delete(DeleteResponse::default())
            }
            Request::DeleteRange(r) => {
                let end = r.header.end_key.clone();
                let max = usize::try_from(r.max_entries_to_delete).unwrap_or(usize::MAX);
                let (deleted, written) = self.with_conflicts(ctx, abort, || {
                    // Newest state of every key, intents included.
                    let rows = mvcc::scan(engine, &key, &end, max, Timestamp::MAX, ctx.txn.as_ref(), true)?;
                    let mut written = ctx.ts;
                    for row in &rows {
                        written.forward(mvcc::delete(engine, &row.key, ctx.ts, ctx.txn.as_ref())?);
                    }
                    Ok((rows.into_iter().map(|r| r.key).collect::<Vec<_>>(), written))
                })?;
                ctx.wrote(written);
                // Only keys that held a value get an intent.
                if let Some(id) = ctx.txn_id() {
                    for k in &deleted {
                        self.txns.add_intent(&id, k);
                    }
                }
                return Ok(Response::DeleteRange(DeleteRangeResponse {
                    num_deleted: deleted.len() as i64,
                    ..Default::default()
                }));
            }
            other => {
                return Err(CairnError::InvalidArgument(format!("{} is not a write", other.method())))
            }
        };
        if let Some(id) = ctx.txn_id() {
            self.txns.add_intent(&id, &key);
        }
        Ok(out)
    }

    /// Runs `op`, pushing the owner of any intent it runs into and retrying.
    ///
    /// A refused push surfaces as `WriteIntent` carrying the winner's priority.
    fn with_conflicts<T>(
        &self,
        ctx: &Ctx,
        kind: PushKind,
        mut op: impl FnMut() -> Result<T, CairnError>,
    ) -> Result<T, CairnError> {
        let mut attempts = 0;
        loop {
            match op() {
                Err(CairnError::WriteIntent { key, txn_id, priority }) => {
                    if attempts >= self.config.push_retries {
                        return Err(CairnError::WriteIntent { key, txn_id, priority });
                    }
                    attempts += 1;
                    match self.txns.push(&ctx.pusher, txn_id, kind, self.clock.physical_now()) {
                        PushOutcome::Refused { priority } => {
                            return Err(CairnError::WriteIntent { key, txn_id, priority });
                        }
                        PushOutcome::Resolved { resolution, intents } => {
                            mvcc::resolve_intent(&self.engine, &key, &resolution)?;
                            for other in intents.iter().filter(|k| **k != key) {
                                mvcc::resolve_intent(&self.engine, other, &resolution)?;
                            }
                        }
                    }
                }
                other => return other,
            }
        }
    }

    async fn end_transaction(
        &self,
        state: &mut RangeState,
        r: EndTransactionRequest,
        txn: Transaction,
    ) -> Result<(Transaction, EndTransactionResponse), CairnError> {
        let trigger = if r.commit { r.internal_commit_trigger } else { None };

        // A merge fences the subsumed range by holding its latch until the
        // trigger has been applied.
        let mut right = match &trigger {
            Some(InternalCommitTrigger::Merge(m)) => {
                let range = self
                    .range_by_id(m.subsumed_raft_id)
                    .ok_or(CairnError::RangeNotFound { raft_id: m.subsumed_raft_id })?;
                Some(range.lock_owned().await)
            }
            _ => None,
        };
        let prepared = match &trigger {
            Some(t) => Some(self.prepare_trigger(state, right.as_deref(), t)?),
            None => None,
        };

        let (fin, intents) = self.txns.finalize(&txn, r.commit, self.clock.physical_now())?;
        let resolution = IntentResolution::from(&fin);
        for key in &intents {
            mvcc::resolve_intent(&self.engine, key, &resolution)?;
        }

        match (prepared, right.as_deref_mut()) {
            (Some(PreparedTrigger::Split { trigger, left_stats, right_stats }), _) => {
                self.apply_split(state, trigger, left_stats, right_stats);
            }
            (Some(PreparedTrigger::Merge { trigger, stats }), Some(right_state)) => {
                self.apply_merge(state, right_state, trigger, stats);
            }
            (Some(PreparedTrigger::Merge { .. }), None) => {
                tracing::error!(txn = %fin.id, "merge trigger without a fenced right range");
            }
            (None, _) => {}
        }

        let commit_wait = if fin.status == TransactionStatus::Committed {
            let now = self.clock.update(fin.timestamp);
            (fin.timestamp.wall_time + self.clock.max_offset_nanos() - now.wall_time).max(0)
        } else {
            0
        };
        tracing::debug!(txn = %fin.id, status = ?fin.status, intents = intents.len(), commit_wait, "transaction finished");
        Ok((fin, EndTransactionResponse { commit_wait, resolved: intents, ..Default::default() }))
    }

    // -----------------------------------------------------------------------
    // Commit triggers
    // -----------------------------------------------------------------------

    fn prepare_trigger(
        &self,
        state: &RangeState,
        right: Option<&RangeState>,
        trigger: &InternalCommitTrigger,
    ) -> Result<PreparedTrigger, CairnError> {
        let desc = &state.desc;
        match trigger {
            InternalCommitTrigger::Split(t) => {
                let (left, new) = (&t.updated_desc, &t.new_desc);
                let fits = left.raft_id == desc.raft_id
                    && left.start_key == desc.start_key
                    && new.end_key == desc.end_key
                    && left.end_key == new.start_key
                    && new.start_key > desc.start_key
                    && desc.contains_key(&new.start_key)
                    && self.range_by_id(new.raft_id).is_none();
                if !fits {
                    return Err(CairnError::InvalidArgument(format!(
                        "split trigger does not match range {}",
                        desc.raft_id
                    )));
                }
                Ok(PreparedTrigger::Split {
                    trigger: t.clone(),
                    left_stats: mvcc::stats(&self.engine, &left.start_key, &left.end_key)?,
                    right_stats: mvcc::stats(&self.engine, &new.start_key, &new.end_key)?,
                })
            }
            InternalCommitTrigger::Merge(t) => {
                let right = right.ok_or(CairnError::RangeNotFound { raft_id: t.subsumed_raft_id })?;
                if right.subsumed {
                    return Err(CairnError::RangeNotFound { raft_id: t.subsumed_raft_id });
                }
                let merged = &t.updated_desc;
                let fits = merged.raft_id == desc.raft_id
                    && merged.start_key == desc.start_key
                    && desc.end_key == right.desc.start_key
                    && merged.end_key == right.desc.end_key
                    && desc.replicas == right.desc.replicas;
                if !fits {
                    return Err(CairnError::InvalidArgument(format!(
                        "merge trigger does not match ranges {} and {}",
                        desc.raft_id, right.desc.raft_id
                    )));
                }
                Ok(PreparedTrigger::Merge {
                    trigger: t.clone(),
                    stats: mvcc::stats(&self.engine, &merged.start_key, &merged.end_key)?,
                })
            }
        }
    }

    fn apply_split(&self, state: &mut RangeState, trigger: SplitTrigger, left_stats: MvccStats, right_stats: MvccStats) {
        let low_water = self.clock.now().max(state.ts_cache.high_water());
        let mut right = RangeState::new(trigger.new_desc.clone(), self.config.replay_window, low_water);
        state.response_cache.copy_into(&mut right.response_cache);
        right.stats = right_stats;
        state.stats = left_stats;

        let old_end = std::mem::replace(&mut state.desc, trigger.updated_desc).end_key;
        let right = Arc::new(Range::new(right));
        {
            let mut map = self.ranges.write();
            if let Some(left) = map.by_id.get(&state.desc.raft_id).cloned() {
                map.by_end.insert(state.desc.end_key.clone(), left);
            }
            map.insert(old_end, right);
        }
        tracing::info!(
            left = state.desc.raft_id,
            right = trigger.new_desc.raft_id,
            split_key = ?trigger.new_desc.start_key,
            "range split"
        );
    }

    fn apply_merge(&self, state: &mut RangeState, right: &mut RangeState, trigger: MergeTrigger, stats: MvccStats) {
        right.subsumed = true;
        right.response_cache.copy_into(&mut state.response_cache);
        state.ts_cache.forward_low_water(right.ts_cache.high_water());
        state.stats = stats;

        let old_end = std::mem::replace(&mut state.desc, trigger.updated_desc).end_key;
        {
            let mut map = self.ranges.write();
            map.by_end.remove(&old_end);
            map.by_id.remove(&trigger.subsumed_raft_id);
            if let Some(left) = map.by_id.get(&state.desc.raft_id).cloned() {
                map.by_end.insert(state.desc.end_key.clone(), left);
            }
        }
        tracing::info!(left = state.desc.raft_id, subsumed = trigger.subsumed_raft_id, "ranges merged");
    }

    // -----------------------------------------------------------------------
    // Garbage collection
    // -----------------------------------------------------------------------

    /// Evicts expired replay entries, old read timestamps and finished
    /// transaction records, and refreshes range stats.
    pub async fn gc(&self) -> GcReport {
        let mut report = GcReport::default();
        let now = self.clock.physical_now();
        let wall = self.clock.now().wall_time;
        let threshold = Timestamp::new(wall.saturating_sub(self.config.ts_cache_window.as_nanos() as i64), 0);

        for range in self.ranges() {
            let mut state = range.lock().await;
            report.responses += state.response_cache.gc(now);
            report.reads += state.ts_cache.evict(threshold);
            match mvcc::stats(&self.engine, &state.desc.start_key, &state.desc.end_key) {
                Ok(stats) => state.stats = stats,
                Err(e) => tracing::warn!(raft_id = state.desc.raft_id, error = %e, "failed to refresh range stats"),
            }
        }
        report.txns = self.txns.gc(now, self.config.replay_window);
        tracing::debug!(?report, "gc pass complete");
        report
    }
}

fn check_not_integer(key: &[u8], current: Option<&Value>) -> Result<(), CairnError> {
    if let Some(Value::Integer(_)) = current {
        return Err(CairnError::ValueKindMismatch {
            key: key.to_vec(),
            reason: "integer values can only be changed through increment".into(),
        });
    }
    Ok(())
}
