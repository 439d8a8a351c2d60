//! Per-range response cache keyed by client command id.
//!
//! A command seen within the replay window is answered from the cache with
//! the exact bytes of its first response, including the first response's
//! error. Outside the window the command executes again.

use std::collections::HashMap;
use std::time::Duration;

use cairn_api::Response;
use cairn_types::{CairnError, ClientCmdId};

use crate::{decode, encode};

#[derive(Debug, Clone)]
struct CachedResponse {
    /// Physical time (ns) when the response was recorded.
    recorded_at: i64,
    encoded: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    Fresh,
    Cached(Response),
}

#[derive(Debug, Clone)]
pub struct ResponseCache {
    window: Duration,
    entries: HashMap<ClientCmdId, CachedResponse>,
}

impl ResponseCache {
    pub fn new(window: Duration) -> Self {
        ResponseCache { window, entries: HashMap::new() }
    }

    fn window_nanos(&self) -> i64 {
        self.window.as_nanos() as i64
    }

    fn expired(&self, entry: &CachedResponse, now: i64) -> bool {
        now.saturating_sub(entry.recorded_at) > self.window_nanos()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn register(&mut self, cmd_id: &ClientCmdId, now: i64) -> Result<Registration, CairnError> {
        if cmd_id.is_empty() {
            return Ok(Registration::Fresh);
        }
        let Some(entry) = self.entries.get(cmd_id) else {
            return Ok(Registration::Fresh);
        };
        if self.expired(entry, now) {
            tracing::debug!(
                wall_time = cmd_id.wall_time,
                random = cmd_id.random,
                "replay window elapsed; command executes again"
            );
            self.entries.remove(cmd_id);
            return Ok(Registration::Fresh);
        }
        Ok(Registration::Cached(decode(&entry.encoded)?))
    }

    /// Stores `response` for replay. Responses with retryable errors are not
    /// stored so that a retry under the same id executes again.
    pub fn record(&mut self, cmd_id: &ClientCmdId, response: &Response, now: i64) -> Result<(), CairnError> {
        if cmd_id.is_empty() || response.error().is_some_and(CairnError::retryable) {
            return Ok(());
        }
        let encoded = encode(response)?;
        self.entries.insert(*cmd_id, CachedResponse { recorded_at: now, encoded });
        Ok(())
    }

    /// Evicts entries recorded outside the window. Returns the number evicted.
    pub fn gc(&mut self, now: i64) -> usize {
        let window = self.window_nanos();
        let before = self.entries.len();
        self.entries.retain(|_, e| now.saturating_sub(e.recorded_at) <= window);
        before - self.entries.len()
    }

    /// Copies every entry into `other`, keeping entries `other` already has.
    pub fn copy_into(&self, other: &mut ResponseCache) {
        for (id, entry) in &self.entries {
            other.entries.entry(*id).or_insert_with(|| entry.clone());
        }
    }

    /// Encoded bytes of a cached response.
    pub fn raw(&self, cmd_id: &ClientCmdId) -> Option<&[u8]> {
        self.entries.get(cmd_id).map(|e| e.encoded.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use cairn_api::Method;

    use super::*;

    const SECOND: i64 = 1_000_000_000;

    fn cache() -> ResponseCache {
        ResponseCache::new(Duration::from_secs(10))
    }

    fn increment(v: i64) -> Response {
        let mut r = Response::new_for(Method::Increment);
        if let Response::Increment(i) = &mut r {
            i.new_value = v;
        }
        r
    }

    #[test]
    fn replays_within_window() {
        let mut c = cache();
        let id = ClientCmdId::new(1, 2);
        assert_eq!(c.register(&id, 0).unwrap(), Registration::Fresh);
        c.record(&id, &increment(5), 0).unwrap();

        match c.register(&id, 5 * SECOND).unwrap() {
            Registration::Cached(resp) => {
                assert_eq!(encode(&resp).unwrap(), c.raw(&id).unwrap());
                assert_eq!(resp, increment(5));
            }
            Registration::Fresh => panic!("expected cached response"),
        }
    }

    #[test]
    fn weakens_outside_window() {
        let mut c = cache();
        let id = ClientCmdId::new(1, 2);
        c.record(&id, &increment(5), 0).unwrap();
        assert_eq!(c.register(&id, 11 * SECOND).unwrap(), Registration::Fresh);
        assert!(c.is_empty());
    }

    #[test]
    fn errors_are_replayed_unless_retryable() {
        let mut c = cache();
        let failed = Response::error_for(
            Method::ConditionalPut,
            CairnError::ConditionFailed { actual_value: None },
        );
        let id = ClientCmdId::new(1, 1);
        c.record(&id, &failed, 0).unwrap();
        assert_eq!(c.register(&id, 0).unwrap(), Registration::Cached(failed));

        let retry = Response::error_for(Method::Put, CairnError::NotLeaseHolder { raft_id: 1 });
        let id = ClientCmdId::new(1, 2);
        c.record(&id, &retry, 0).unwrap();
        assert_eq!(c.register(&id, 0).unwrap(), Registration::Fresh);
    }

    #[test]
    fn empty_id_is_never_cached() {
        let mut c = cache();
        c.record(&ClientCmdId::default(), &increment(1), 0).unwrap();
        assert!(c.is_empty());
    }

    #[test]
    fn gc_and_copy() {
        let mut c = cache();
        c.record(&ClientCmdId::new(1, 1), &increment(1), 0).unwrap();
        c.record(&ClientCmdId::new(2, 2), &increment(2), 8 * SECOND).unwrap();

        let mut other = cache();
        c.copy_into(&mut other);
        assert_eq!(other.len(), 2);

        assert_eq!(c.gc(15 * SECOND), 1);
        assert_eq!(c.len(), 1);
        assert!(c.raw(&ClientCmdId::new(2, 2)).is_some());
    }
}
