use std::time::Duration;

use rand::Rng;
use uuid::Uuid;

use crate::{Key, Timestamp};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum IsolationType {
    #[default]
    Serializable,
    Snapshot,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TransactionStatus {
    #[default]
    Pending,
    Committed,
    Aborted,
}

/// Client-visible state of a multi-operation transaction.
///
/// `priority` and `timestamp` only ever move up. `status` leaves `Pending`
/// at most once.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Transaction {
    pub name: String,
    /// Anchor key; the transaction's EndTransaction is addressed here.
    pub key: Key,
    pub id: Uuid,
    pub priority: i32,
    pub isolation: IsolationType,
    pub status: TransactionStatus,
    /// Incremented on every restart; intents from older epochs are discarded.
    pub epoch: u32,
    pub timestamp: Timestamp,
    pub orig_timestamp: Timestamp,
    /// Upper bound of the clock-uncertainty interval.
    pub max_timestamp: Timestamp,
}

impl Transaction {
    pub fn new(
        name: impl Into<String>,
        key: Key,
        user_priority: i32,
        isolation: IsolationType,
        now: Timestamp,
        max_offset: Duration,
    ) -> Self {
        Transaction {
            name: name.into(),
            key,
            id: Uuid::new_v4(),
            priority: make_priority(user_priority),
            isolation,
            status: TransactionStatus::Pending,
            epoch: 0,
            timestamp: now,
            orig_timestamp: now,
            max_timestamp: now.add_nanos(max_offset.as_nanos() as i64),
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.status != TransactionStatus::Pending
    }

    pub fn upgrade_priority(&mut self, min_priority: i32) {
        if min_priority > self.priority {
            self.priority = min_priority;
        }
    }

    /// Merges state learned from another copy of the same transaction.
    pub fn update(&mut self, other: &Transaction) {
        if other.id != self.id {
            return;
        }
        if self.status == TransactionStatus::Pending {
            self.status = other.status;
        }
        if other.epoch > self.epoch {
            self.epoch = other.epoch;
        }
        self.timestamp.forward(other.timestamp);
        self.orig_timestamp.forward(other.orig_timestamp);
        self.max_timestamp.forward(other.max_timestamp);
        self.upgrade_priority(other.priority);
    }

    /// Starts a new epoch at (or above) `timestamp` with at least `min_priority`.
    pub fn restart(&mut self, user_priority: i32, min_priority: i32, timestamp: Timestamp) {
        self.epoch += 1;
        self.timestamp.forward(timestamp);
        self.orig_timestamp = self.timestamp;
        self.upgrade_priority(make_priority(user_priority));
        self.upgrade_priority(min_priority);
    }
}

/// User priority that always yields the highest transaction priority.
pub const MAX_USER_PRIORITY: i32 = i32::MAX;

/// Draws a random priority biased upward by `user_priority`.
///
/// Every user priority below [`MAX_USER_PRIORITY`] draws strictly below
/// `i32::MAX`, so a maximum-priority transaction wins every push it starts.
pub fn make_priority(user_priority: i32) -> i32 {
    let user_priority = user_priority.max(1);
    if user_priority == MAX_USER_PRIORITY {
        return i32::MAX;
    }
    let top = i32::MAX - 1;
    top - rand::thread_rng().gen_range(0..top / user_priority)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn() -> Transaction {
        Transaction::new(
            "t",
            b"a".to_vec(),
            1,
            IsolationType::Serializable,
            Timestamp::new(100, 0),
            Duration::from_nanos(50),
        )
    }

    #[test]
    fn new_sets_uncertainty_bound() {
        let t = txn();
        assert_eq!(t.status, TransactionStatus::Pending);
        assert_eq!(t.orig_timestamp, t.timestamp);
        assert_eq!(t.max_timestamp, Timestamp::new(150, 0));
        assert!(t.priority > 0);
    }

    #[test]
    fn update_never_regresses() {
        let mut a = txn();
        let mut b = a.clone();
        b.timestamp = Timestamp::new(120, 0);
        b.priority = a.priority.saturating_add(1);
        b.status = TransactionStatus::Aborted;
        a.update(&b);
        assert_eq!(a.timestamp, Timestamp::new(120, 0));
        assert_eq!(a.priority, b.priority);
        assert_eq!(a.status, TransactionStatus::Aborted);

        let mut older = b.clone();
        older.timestamp = Timestamp::new(101, 0);
        older.status = TransactionStatus::Committed;
        a.update(&older);
        assert_eq!(a.timestamp, Timestamp::new(120, 0));
        assert_eq!(a.status, TransactionStatus::Aborted);
    }

    #[test]
    fn update_ignores_other_transactions() {
        let mut a = txn();
        let b = txn();
        let before = a.clone();
        a.update(&b);
        assert_eq!(a, before);
    }

    #[test]
    fn restart_bumps_epoch_and_priority() {
        let mut t = txn();
        t.restart(1, i32::MAX, Timestamp::new(200, 0));
        assert_eq!(t.epoch, 1);
        assert_eq!(t.timestamp, Timestamp::new(200, 0));
        assert_eq!(t.orig_timestamp, Timestamp::new(200, 0));
        assert_eq!(t.priority, i32::MAX);
    }

    #[test]
    fn priority_bounds() {
        for _ in 0..100 {
            let p = make_priority(1);
            assert!(p > 0 && p < i32::MAX);
            assert!(make_priority(1000) >= i32::MAX - 1 - (i32::MAX - 1) / 1000);
        }
        assert_eq!(make_priority(MAX_USER_PRIORITY), i32::MAX);
        assert_eq!(make_priority(MAX_USER_PRIORITY - 1), i32::MAX - 1);
        // Non-positive values count as the default priority.
        assert!(make_priority(0) < i32::MAX);
    }
}
