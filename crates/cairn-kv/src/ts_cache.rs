use std::collections::BTreeMap;
use std::ops::Bound;

use uuid::Uuid;

use cairn_storage::keys::next_key;
use cairn_types::{Key, Timestamp};

/// Latest read of one key or span.
#[derive(Debug, Clone, Copy, Default)]
struct ReadMark {
    latest: Timestamp,
    /// Transaction that performed the latest read, if any.
    txn_id: Option<Uuid>,
    /// Latest read known to come from somebody other than `txn_id`.
    others: Timestamp,
}

impl ReadMark {
    fn add(&mut self, ts: Timestamp, txn_id: Option<Uuid>) {
        if ts > self.latest {
            if self.txn_id != txn_id {
                self.others.forward(self.latest);
            }
            self.latest = ts;
            self.txn_id = txn_id;
        } else if self.txn_id != txn_id || txn_id.is_none() {
            self.others.forward(ts);
        }
    }

    /// Latest read a writer from `txn_id` has to stay above.
    fn visible_to(&self, txn_id: Option<Uuid>) -> Timestamp {
        if txn_id.is_some() && self.txn_id == txn_id {
            self.others
        } else {
            self.latest
        }
    }
}

#[derive(Debug, Clone)]
struct SpanRead {
    start: Key,
    end: Key,
    mark: ReadMark,
}

/// Per-range record of read timestamps.
///
/// Any write to a key must land above the latest read of that key by another
/// party. Evicted history is summarized by `low_water`, a floor for every key.
#[derive(Debug, Clone)]
pub struct TimestampCache {
    low_water: Timestamp,
    points: BTreeMap<Key, ReadMark>,
    spans: Vec<SpanRead>,
}

impl TimestampCache {
    pub fn new(low_water: Timestamp) -> Self {
        TimestampCache { low_water, points: BTreeMap::new(), spans: Vec::new() }
    }

    pub fn low_water(&self) -> Timestamp {
        self.low_water
    }

    /// Newest read timestamp recorded anywhere in the cache.
    pub fn high_water(&self) -> Timestamp {
        let points = self.points.values().map(|m| m.latest);
        let spans = self.spans.iter().map(|s| s.mark.latest);
        points.chain(spans).fold(self.low_water, Timestamp::max)
    }

    /// Records a read of `[start, end)` (or of `start` alone if `end` is empty).
    pub fn add(&mut self, start: &[u8], end: &[u8], ts: Timestamp, txn_id: Option<Uuid>) {
        if ts <= self.low_water {
            return;
        }
        if end.is_empty() {
            self.points.entry(start.to_vec()).or_default().add(ts, txn_id);
            return;
        }
        if let Some(span) = self.spans.iter_mut().find(|s| s.start == start && s.end == end) {
            span.mark.add(ts, txn_id);
            return;
        }
        let mut mark = ReadMark::default();
        mark.add(ts, txn_id);
        self.spans.push(SpanRead { start: start.to_vec(), end: end.to_vec(), mark });
    }

    /// Latest read overlapping `[start, end)` not performed by `txn_id`.
    pub fn latest_read(&self, start: &[u8], end: &[u8], txn_id: Option<Uuid>) -> Timestamp {
        let end = if end.is_empty() { next_key(start) } else { end.to_vec() };
        let mut ts = self.low_water;
        if start >= end.as_slice() {
            return ts;
        }
        for (_, mark) in self.points.range::<[u8], _>((Bound::Included(start), Bound::Excluded(end.as_slice()))) {
            ts.forward(mark.visible_to(txn_id));
        }
        for span in &self.spans {
            if span.start.as_slice() < end.as_slice() && start < span.end.as_slice() {
                ts.forward(span.mark.visible_to(txn_id));
            }
        }
        ts
    }

    /// Drops entries at or below `threshold` and raises the low-water mark to it.
    pub fn evict(&mut self, threshold: Timestamp) -> usize {
        if threshold <= self.low_water {
            return 0;
        }
        self.low_water = threshold;
        let before = self.points.len() + self.spans.len();
        self.points.retain(|_, m| m.latest > threshold);
        self.spans.retain(|s| s.mark.latest > threshold);
        before - self.points.len() - self.spans.len()
    }

    pub fn forward_low_water(&mut self, ts: Timestamp) {
        self.low_water.forward(ts);
    }

    pub fn len(&self) -> usize {
        self.points.len() + self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(wall: i64) -> Timestamp {
        Timestamp::new(wall, 0)
    }

    #[test]
    fn point_and_span_reads() {
        let mut c = TimestampCache::new(ts(1));
        c.add(b"b", b"", ts(10), None);
        c.add(b"d", b"g", ts(20), None);

        assert_eq!(c.latest_read(b"b", b"", None), ts(10));
        assert_eq!(c.latest_read(b"a", b"", None), ts(1));
        assert_eq!(c.latest_read(b"e", b"", None), ts(20));
        assert_eq!(c.latest_read(b"a", b"c", None), ts(10));
        assert_eq!(c.latest_read(b"a", b"z", None), ts(20));
        assert_eq!(c.latest_read(b"g", b"", None), ts(1));
        assert_eq!(c.high_water(), ts(20));
    }

    #[test]
    fn own_reads_do_not_push_own_writes() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut c = TimestampCache::new(ts(0));
        c.add(b"k", b"", ts(5), Some(other));
        c.add(b"k", b"", ts(9), Some(me));

        assert_eq!(c.latest_read(b"k", b"", Some(me)), ts(5));
        assert_eq!(c.latest_read(b"k", b"", Some(other)), ts(9));
        assert_eq!(c.latest_read(b"k", b"", None), ts(9));
    }

    #[test]
    fn eviction_raises_low_water() {
        let mut c = TimestampCache::new(ts(0));
        c.add(b"a", b"", ts(5), None);
        c.add(b"b", b"", ts(15), None);
        c.add(b"c", b"d", ts(7), None);
        assert_eq!(c.evict(ts(10)), 2);
        assert_eq!(c.len(), 1);
        assert_eq!(c.latest_read(b"a", b"", None), ts(10));
        assert_eq!(c.latest_read(b"b", b"", None), ts(15));
        // Reads below the low-water mark are already covered.
        c.add(b"x", b"", ts(3), None);
        assert_eq!(c.len(), 1);
    }
}
