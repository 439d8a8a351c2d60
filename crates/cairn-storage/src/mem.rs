use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;

use cairn_types::{CairnError, Key};

use crate::traits::MvccEngine;
use crate::types::KeyRecord;

/// In-memory `MvccEngine` backed by a `BTreeMap`.
///
/// Used by tests and by the single-node binary; not persisted across restarts.
#[derive(Clone, Default)]
pub struct MemEngine {
    inner: Arc<RwLock<BTreeMap<Key, KeyRecord>>>,
}

impl MemEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl MvccEngine for MemEngine {
    fn get_record(&self, key: &[u8]) -> Result<Option<KeyRecord>, CairnError> {
        Ok(self.inner.read().get(key).cloned())
    }

    fn put_record(&self, key: &[u8], record: KeyRecord) -> Result<(), CairnError> {
        let mut g = self.inner.write();
        if record.is_empty() {
            g.remove(key);
        } else {
            g.insert(key.to_vec(), record);
        }
        Ok(())
    }

    fn remove_record(&self, key: &[u8]) -> Result<(), CairnError> {
        self.inner.write().remove(key);
        Ok(())
    }

    fn scan_keys(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Key, KeyRecord)>, CairnError> {
        if !end.is_empty() && start >= end {
            return Ok(Vec::new());
        }
        let upper = if end.is_empty() { Bound::Unbounded } else { Bound::Excluded(end) };
        let g = self.inner.read();
        Ok(g.range::<[u8], _>((Bound::Included(start), upper))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
