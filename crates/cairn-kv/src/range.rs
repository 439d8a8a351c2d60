use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard};

use cairn_storage::MvccStats;
use cairn_types::{CairnError, RaftId, RangeDescriptor, Timestamp};

use crate::replay::ResponseCache;
use crate::ts_cache::TimestampCache;

/// Mutable state of a range, guarded by its command latch.
#[derive(Debug)]
pub struct RangeState {
    pub desc: RangeDescriptor,
    /// Set once the range has been merged into its left neighbour.
    pub subsumed: bool,
    pub response_cache: ResponseCache,
    pub ts_cache: TimestampCache,
    pub stats: MvccStats,
}

impl RangeState {
    pub fn new(desc: RangeDescriptor, replay_window: Duration, low_water: Timestamp) -> Self {
        RangeState {
            desc,
            subsumed: false,
            response_cache: ResponseCache::new(replay_window),
            ts_cache: TimestampCache::new(low_water),
            stats: MvccStats::default(),
        }
    }

    /// Verifies that `[key, end_key)` still belongs to this range.
    pub fn check_span(&self, key: &[u8], end_key: &[u8]) -> Result<(), CairnError> {
        if self.subsumed {
            return Err(CairnError::RangeNotFound { raft_id: self.desc.raft_id });
        }
        if !self.desc.contains_key_range(key, end_key) {
            return Err(CairnError::RangeKeyMismatch {
                start: key.to_vec(),
                end: end_key.to_vec(),
                raft_id: self.desc.raft_id,
            });
        }
        Ok(())
    }
}

/// A contiguous key span served as one unit. Commands on a range run one at
/// a time under its latch.
#[derive(Debug)]
pub struct Range {
    raft_id: RaftId,
    state: Arc<Mutex<RangeState>>,
}

impl Range {
    pub fn new(state: RangeState) -> Self {
        Range { raft_id: state.desc.raft_id, state: Arc::new(Mutex::new(state)) }
    }

    pub fn raft_id(&self) -> RaftId {
        self.raft_id
    }

    pub async fn lock(&self) -> MutexGuard<'_, RangeState> {
        self.state.lock().await
    }

    pub async fn lock_owned(&self) -> OwnedMutexGuard<RangeState> {
        self.state.clone().lock_owned().await
    }

    pub async fn descriptor(&self) -> RangeDescriptor {
        self.state.lock().await.desc.clone()
    }
}
