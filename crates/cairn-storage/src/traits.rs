use cairn_types::{CairnError, Key};

use crate::types::KeyRecord;

/// Ordered key-record store underneath the MVCC rules in [`crate::mvcc`].
///
/// Each call is individually atomic. Callers serialize read-modify-write
/// sequences on a key themselves (the owning range's command latch).
///
/// Unlike the storage traits of a replicated log, methods are synchronous:
/// the engine is memory-resident and every call is a short critical section.
pub trait MvccEngine: Send + Sync {
    fn get_record(&self, key: &[u8]) -> Result<Option<KeyRecord>, CairnError>;

    /// Replaces the record under `key`. An empty record removes the key.
    fn put_record(&self, key: &[u8], record: KeyRecord) -> Result<(), CairnError>;

    fn remove_record(&self, key: &[u8]) -> Result<(), CairnError>;

    /// All records in `[start, end)` in key order. An empty `end` is unbounded.
    fn scan_keys(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Key, KeyRecord)>, CairnError>;
}

impl<E: MvccEngine + ?Sized> MvccEngine for &E {
    fn get_record(&self, key: &[u8]) -> Result<Option<KeyRecord>, CairnError> {
        (**self).get_record(key)
    }

    fn put_record(&self, key: &[u8], record: KeyRecord) -> Result<(), CairnError> {
        (**self).put_record(key, record)
    }

    fn remove_record(&self, key: &[u8]) -> Result<(), CairnError> {
        (**self).remove_record(key)
    }

    fn scan_keys(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Key, KeyRecord)>, CairnError> {
        (**self).scan_keys(start, end)
    }
}
