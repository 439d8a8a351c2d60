//! Range-partitioned transactional key-value store.
//!
//! A [`Store`] owns a set of ranges over one MVCC engine. Every request is
//! routed to the range covering its keys and runs under that range's latch,
//! guarded by a per-range response cache for client retries and a timestamp
//! cache that keeps writes above prior reads.

pub mod admin;
pub mod batch;
pub mod client;
pub mod clock;
pub mod consistency;
pub mod gc;
pub mod range;
pub mod replay;
pub mod store;
pub mod ts_cache;
pub mod txn;

pub use batch::BatchStrategy;
pub use client::{KvClient, TxnHandle};
pub use clock::{Clock, ManualClock, PhysicalClock, SystemClock};
pub use consistency::ReadPolicy;
pub use gc::GcTask;
pub use range::{Range, RangeState};
pub use replay::{Registration, ResponseCache};
pub use store::{GcReport, Store, StoreConfig, DEFAULT_REPLAY_WINDOW};
pub use ts_cache::TimestampCache;
pub use txn::{PushKind, PushOutcome, Pusher, TxnRecord, TxnTable};

use cairn_types::CairnError;
use serde::{de::DeserializeOwned, Serialize};

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CairnError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| CairnError::Storage(format!("encode: {e}")))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CairnError> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(v, _)| v)
        .map_err(|e| CairnError::Storage(format!("decode: {e}")))
}
