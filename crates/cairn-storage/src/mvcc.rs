//! Multi-version read and write rules over an [`MvccEngine`].
//!
//! Reads see the newest committed version at or below the read timestamp.
//! A transaction additionally sees its own intents from its current epoch.
//! Foreign intents block writers and consistent readers; the caller resolves
//! the conflict and retries.

use std::ops::Bound;

use cairn_types::{CairnError, Key, KeyValue, Timestamp, Transaction, TransactionStatus, Value};

use crate::traits::MvccEngine;
use crate::types::{IntentResolution, Intent, KeyRecord, MvccStats, TxnMeta};

fn write_intent_error(key: &[u8], intent: &Intent) -> CairnError {
    CairnError::WriteIntent {
        key: key.to_vec(),
        txn_id: intent.txn.id,
        priority: intent.txn.priority,
    }
}

/// The value visible in `record` to a reader at `ts`.
fn visible(
    key: &[u8],
    record: &KeyRecord,
    ts: Timestamp,
    txn: Option<&Transaction>,
    observe_intents: bool,
) -> Result<Option<Value>, CairnError> {
    if let Some(intent) = &record.intent {
        match txn {
            Some(t) if t.id == intent.txn.id => {
                if intent.txn.epoch == t.epoch {
                    return Ok(intent.value.clone());
                }
                // Intent from an earlier epoch; discarded on commit.
            }
            _ => {
                let limit = txn.map_or(ts, |t| t.max_timestamp.max(ts));
                if observe_intents && intent.txn.timestamp <= limit {
                    return Err(write_intent_error(key, intent));
                }
            }
        }
    }

    if let Some(t) = txn {
        if t.max_timestamp > ts {
            let uncertain = record
                .versions
                .range((Bound::Excluded(ts), Bound::Included(t.max_timestamp)))
                .next_back();
            if let Some((existing, _)) = uncertain {
                return Err(CairnError::ReadWithinUncertaintyInterval {
                    read_timestamp: ts,
                    existing_timestamp: *existing,
                });
            }
        }
    }

    Ok(record.version_at(ts).and_then(|(_, v)| v.cloned()))
}

/// Reads `key` at `ts`.
///
/// With `observe_intents == false` (inconsistent reads) foreign intents are
/// skipped and the latest committed value at `ts` is returned.
pub fn get<E: MvccEngine + ?Sized>(
    engine: &E,
    key: &[u8],
    ts: Timestamp,
    txn: Option<&Transaction>,
    observe_intents: bool,
) -> Result<Option<Value>, CairnError> {
    match engine.get_record(key)? {
        None => Ok(None),
        Some(record) => visible(key, &record, ts, txn, observe_intents),
    }
}

/// Reads live rows in `[start, end)` at `ts` in key order. `max == 0` is
/// unbounded.
pub fn scan<E: MvccEngine + ?Sized>(
    engine: &E,
    start: &[u8],
    end: &[u8],
    max: usize,
    ts: Timestamp,
    txn: Option<&Transaction>,
    observe_intents: bool,
) -> Result<Vec<KeyValue>, CairnError> {
    let mut rows = Vec::new();
    for (key, record) in engine.scan_keys(start, end)? {
        if max > 0 && rows.len() >= max {
            break;
        }
        if let Some(value) = visible(&key, &record, ts, txn, observe_intents)? {
            rows.push(KeyValue { key, value });
        }
    }
    Ok(rows)
}

/// The value a writer builds on: its own current intent, else the newest
/// committed value regardless of timestamp.
///
/// Fails with `WriteIntent` on a foreign intent.
pub fn current_for_write<E: MvccEngine + ?Sized>(
    engine: &E,
    key: &[u8],
    txn: Option<&Transaction>,
) -> Result<Option<Value>, CairnError> {
    let Some(record) = engine.get_record(key)? else {
        return Ok(None);
    };
    if let Some(intent) = &record.intent {
        match txn {
            Some(t) if t.id == intent.txn.id => {
                if intent.txn.epoch == t.epoch {
                    return Ok(intent.value.clone());
                }
            }
            _ => return Err(write_intent_error(key, intent)),
        }
    }
    Ok(record.latest_value().cloned())
}

/// Writes `value` (a tombstone when `None`) to `key` at or above `ts`.
///
/// Transactional writes leave an intent; others commit a version directly.
/// Returns the timestamp actually written, which is moved above any newer
/// committed version.
pub fn put<E: MvccEngine + ?Sized>(
    engine: &E,
    key: &[u8],
    ts: Timestamp,
    txn: Option<&Transaction>,
    value: Option<Value>,
) -> Result<Timestamp, CairnError> {
    let mut record = engine.get_record(key)?.unwrap_or_default();
    if let Some(intent) = &record.intent {
        if txn.map_or(true, |t| t.id != intent.txn.id) {
            return Err(write_intent_error(key, intent));
        }
    }

    let mut write_ts = ts;
    if let Some((latest, _)) = record.latest() {
        if latest >= write_ts {
            write_ts = latest.next();
        }
    }

    match txn {
        Some(t) => {
            let mut meta = TxnMeta::from(t);
            meta.timestamp = write_ts;
            record.intent = Some(Intent { txn: meta, value });
        }
        None => {
            if value.is_none() && record.latest_value().is_none() {
                return Ok(write_ts);
            }
            record.versions.insert(write_ts, value);
        }
    }
    engine.put_record(key, record)?;
    Ok(write_ts)
}

pub fn delete<E: MvccEngine + ?Sized>(
    engine: &E,
    key: &[u8],
    ts: Timestamp,
    txn: Option<&Transaction>,
) -> Result<Timestamp, CairnError> {
    put(engine, key, ts, txn, None)
}

/// Applies a transaction outcome to its intent on `key`, if there is one.
///
/// * `Pending`: the intent's timestamp is forwarded (the owner was pushed).
/// * `Committed`: an intent from the committed epoch becomes a version at the
///   commit timestamp; an older-epoch intent is dropped.
/// * `Aborted`: the intent is dropped.
///
/// Returns whether an intent of the transaction was found.
pub fn resolve_intent<E: MvccEngine + ?Sized>(
    engine: &E,
    key: &[u8],
    resolution: &IntentResolution,
) -> Result<bool, CairnError> {
    let Some(mut record) = engine.get_record(key)? else {
        return Ok(false);
    };
    let Some(mut intent) = record.intent.take() else {
        return Ok(false);
    };
    if intent.txn.id != resolution.txn_id {
        return Ok(false);
    }

    match resolution.status {
        TransactionStatus::Pending => {
            intent.txn.timestamp.forward(resolution.timestamp);
            record.intent = Some(intent);
        }
        TransactionStatus::Committed if intent.txn.epoch == resolution.epoch => {
            let mut commit_ts = resolution.timestamp;
            commit_ts.forward(intent.txn.timestamp);
            record.versions.insert(commit_ts, intent.value);
        }
        _ => {}
    }

    if record.is_empty() {
        engine.remove_record(key)?;
    } else {
        engine.put_record(key, record)?;
    }
    Ok(true)
}

/// Timestamp of the newest committed version of `key`.
pub fn latest_version<E: MvccEngine + ?Sized>(
    engine: &E,
    key: &[u8],
) -> Result<Option<Timestamp>, CairnError> {
    Ok(engine.get_record(key)?.and_then(|r| r.latest().map(|(ts, _)| ts)))
}

/// Keys in `[start, end)` whose newest committed version is live.
pub fn live_keys<E: MvccEngine + ?Sized>(
    engine: &E,
    start: &[u8],
    end: &[u8],
) -> Result<Vec<Key>, CairnError> {
    Ok(engine
        .scan_keys(start, end)?
        .into_iter()
        .filter(|(_, r)| r.latest_value().is_some())
        .map(|(k, _)| k)
        .collect())
}

pub fn stats<E: MvccEngine + ?Sized>(
    engine: &E,
    start: &[u8],
    end: &[u8],
) -> Result<MvccStats, CairnError> {
    let mut s = MvccStats::default();
    for (key, record) in engine.scan_keys(start, end)? {
        s.key_count += 1;
        if record.intent.is_some() {
            s.intent_count += 1;
        }
        if let Some(v) = record.latest_value() {
            s.live_count += 1;
            s.live_bytes += (key.len() + v.size()) as i64;
        }
    }
    Ok(s)
}
