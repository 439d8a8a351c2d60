use std::collections::HashSet;

use parking_lot::Mutex;

use cairn_types::{CairnError, Key};

use crate::traits::MvccEngine;
use crate::types::KeyRecord;

/// Engine wrapper that remembers the pre-image of every key it modifies so
/// that a group of writes can be rolled back.
pub struct UndoLog<'a, E: MvccEngine + ?Sized> {
    inner: &'a E,
    state: Mutex<UndoState>,
}

#[derive(Default)]
struct UndoState {
    seen: HashSet<Key>,
    /// First pre-image per key, in modification order.
    entries: Vec<(Key, Option<KeyRecord>)>,
}

impl<'a, E: MvccEngine + ?Sized> UndoLog<'a, E> {
    pub fn new(inner: &'a E) -> Self {
        UndoLog { inner, state: Mutex::new(UndoState::default()) }
    }

    fn remember(&self, key: &[u8]) -> Result<(), CairnError> {
        let mut st = self.state.lock();
        if st.seen.insert(key.to_vec()) {
            let prev = self.inner.get_record(key)?;
            st.entries.push((key.to_vec(), prev));
        }
        Ok(())
    }

    pub fn touched(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Restores every modified key to its pre-image, newest first.
    pub fn rollback(self) -> Result<(), CairnError> {
        let st = self.state.into_inner();
        for (key, prev) in st.entries.into_iter().rev() {
            match prev {
                Some(record) => self.inner.put_record(&key, record)?,
                None => self.inner.remove_record(&key)?,
            }
        }
        Ok(())
    }
}

impl<'a, E: MvccEngine + ?Sized> MvccEngine for UndoLog<'a, E> {
    fn get_record(&self, key: &[u8]) -> Result<Option<KeyRecord>, CairnError> {
        self.inner.get_record(key)
    }

    fn put_record(&self, key: &[u8], record: KeyRecord) -> Result<(), CairnError> {
        self.remember(key)?;
        self.inner.put_record(key, record)
    }

    fn remove_record(&self, key: &[u8]) -> Result<(), CairnError> {
        self.remember(key)?;
        self.inner.remove_record(key)
    }

    fn scan_keys(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Key, KeyRecord)>, CairnError> {
        self.inner.scan_keys(start, end)
    }
}

#[cfg(test)]
mod tests {
    use cairn_types::{Timestamp, Value};

    use super::*;
    use crate::mem::MemEngine;
    use crate::mvcc;

    #[test]
    fn rollback_restores_pre_images() {
        let e = MemEngine::new();
        mvcc::put(&e, b"a", Timestamp::new(1, 0), None, Some(Value::bytes("old"))).unwrap();

        let undo = UndoLog::new(&e);
        mvcc::put(&undo, b"a", Timestamp::new(2, 0), None, Some(Value::bytes("new"))).unwrap();
        mvcc::put(&undo, b"a", Timestamp::new(3, 0), None, Some(Value::bytes("newer"))).unwrap();
        mvcc::put(&undo, b"b", Timestamp::new(2, 0), None, Some(Value::bytes("b"))).unwrap();
        assert_eq!(undo.touched(), 2);
        undo.rollback().unwrap();

        let a = mvcc::get(&e, b"a", Timestamp::MAX, None, true).unwrap();
        assert_eq!(a, Some(Value::bytes("old")));
        assert!(e.get_record(b"b").unwrap().is_none());
    }

    #[test]
    fn dropping_keeps_writes() {
        let e = MemEngine::new();
        {
            let undo = UndoLog::new(&e);
            mvcc::put(&undo, b"a", Timestamp::new(1, 0), None, Some(Value::bytes("v"))).unwrap();
        }
        assert!(e.get_record(b"a").unwrap().is_some());
    }
}
