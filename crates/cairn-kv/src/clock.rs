use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use cairn_types::Timestamp;

/// Source of physical time in nanoseconds since the Unix epoch.
pub trait PhysicalClock: Send + Sync {
    fn now_nanos(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl PhysicalClock for SystemClock {
    fn now_nanos(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as i64
    }
}

/// Manually advanced clock for tests.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(nanos: i64) -> Self {
        ManualClock { nanos: Arc::new(AtomicI64::new(nanos)) }
    }

    pub fn set(&self, nanos: i64) {
        self.nanos.store(nanos, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as i64, Ordering::SeqCst);
    }
}

impl PhysicalClock for ManualClock {
    fn now_nanos(&self) -> i64 {
        self.nanos.load(Ordering::SeqCst)
    }
}

/// Hybrid logical clock.
///
/// Readings are strictly increasing. Remote timestamps are folded in with
/// [`Clock::update`]; those further ahead than `max_offset` are logged and
/// accepted anyway.
pub struct Clock {
    physical: Arc<dyn PhysicalClock>,
    max_offset: Duration,
    state: Mutex<Timestamp>,
}

impl Clock {
    pub fn new(physical: Arc<dyn PhysicalClock>, max_offset: Duration) -> Self {
        Clock { physical, max_offset, state: Mutex::new(Timestamp::ZERO) }
    }

    pub fn system(max_offset: Duration) -> Self {
        Self::new(Arc::new(SystemClock), max_offset)
    }

    pub fn max_offset(&self) -> Duration {
        self.max_offset
    }

    pub fn max_offset_nanos(&self) -> i64 {
        self.max_offset.as_nanos() as i64
    }

    pub fn physical_now(&self) -> i64 {
        self.physical.now_nanos()
    }

    pub fn now(&self) -> Timestamp {
        let physical = self.physical.now_nanos();
        let mut state = self.state.lock();
        *state = if physical > state.wall_time { Timestamp::new(physical, 0) } else { state.next() };
        *state
    }

    /// Folds a timestamp received from elsewhere into the clock and returns
    /// a reading above both.
    pub fn update(&self, remote: Timestamp) -> Timestamp {
        let physical = self.physical.now_nanos();
        if remote.wall_time.saturating_sub(physical) > self.max_offset_nanos() {
            tracing::warn!(
                remote = %remote,
                ahead_ns = remote.wall_time - physical,
                max_offset_ns = self.max_offset_nanos(),
                "remote wall time is too far ahead; updating anyway"
            );
        }
        let mut state = self.state.lock();
        let newest = (*state).max(remote);
        *state = if physical > newest.wall_time { Timestamp::new(physical, 0) } else { newest.next() };
        *state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual(nanos: i64) -> (ManualClock, Clock) {
        let m = ManualClock::new(nanos);
        let c = Clock::new(Arc::new(m.clone()), Duration::from_nanos(100));
        (m, c)
    }

    #[test]
    fn readings_strictly_increase() {
        let (m, c) = manual(1_000);
        let a = c.now();
        let b = c.now();
        assert_eq!(a, Timestamp::new(1_000, 0));
        assert_eq!(b, Timestamp::new(1_000, 1));
        m.advance(Duration::from_nanos(5));
        assert_eq!(c.now(), Timestamp::new(1_005, 0));
        // Physical time going backwards does not regress the clock.
        m.set(10);
        assert!(c.now() > Timestamp::new(1_005, 0));
    }

    #[test]
    fn update_jumps_past_remote() {
        let (_m, c) = manual(1_000);
        let t = c.update(Timestamp::new(5_000, 7));
        assert_eq!(t, Timestamp::new(5_000, 8));
        assert!(c.now() > t);

        // An older remote only bumps the logical counter.
        let u = c.update(Timestamp::new(10, 0));
        assert!(u > t);
    }

    #[test]
    fn system_clock_is_positive() {
        let c = Clock::system(Duration::from_millis(250));
        assert!(c.now().wall_time > 0);
        assert_eq!(c.max_offset_nanos(), 250_000_000);
    }
}
