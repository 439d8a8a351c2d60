use std::fmt;

/// Hybrid logical timestamp: wall-clock nanoseconds plus a logical counter.
///
/// A zero timestamp means "unset"; servers substitute their own clock reading.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct Timestamp {
    pub wall_time: i64,
    pub logical: i32,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp { wall_time: 0, logical: 0 };
    pub const MAX: Timestamp = Timestamp { wall_time: i64::MAX, logical: i32::MAX };

    pub const fn new(wall_time: i64, logical: i32) -> Self {
        Timestamp { wall_time, logical }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// The smallest timestamp strictly greater than `self`.
    pub fn next(&self) -> Timestamp {
        if self.logical == i32::MAX {
            Timestamp::new(self.wall_time.saturating_add(1), 0)
        } else {
            Timestamp::new(self.wall_time, self.logical + 1)
        }
    }

    pub fn add_nanos(&self, nanos: i64) -> Timestamp {
        Timestamp::new(self.wall_time.saturating_add(nanos), self.logical)
    }

    /// Ratchets `self` up to `other`. Returns true if `self` moved.
    pub fn forward(&mut self, other: Timestamp) -> bool {
        if other > *self {
            *self = other;
            true
        } else {
            false
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:09},{}",
            self.wall_time / 1_000_000_000,
            self.wall_time % 1_000_000_000,
            self.logical
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_orders_after_self() {
        let ts = Timestamp::new(10, 3);
        assert!(ts.next() > ts);
        assert_eq!(ts.next(), Timestamp::new(10, 4));
        assert_eq!(Timestamp::new(10, i32::MAX).next(), Timestamp::new(11, 0));
    }

    #[test]
    fn forward_only_moves_up() {
        let mut ts = Timestamp::new(5, 0);
        assert!(!ts.forward(Timestamp::new(4, 9)));
        assert_eq!(ts, Timestamp::new(5, 0));
        assert!(ts.forward(Timestamp::new(5, 1)));
        assert_eq!(ts, Timestamp::new(5, 1));
    }

    #[test]
    fn display_splits_seconds() {
        assert_eq!(Timestamp::new(1_500_000_000, 2).to_string(), "1.500000000,2");
    }
}
