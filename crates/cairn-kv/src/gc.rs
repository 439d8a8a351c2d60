use std::sync::Arc;
use std::time::Duration;

use cairn_consensus::ReplicaGroup;
use cairn_storage::MvccEngine;

use crate::store::{GcReport, Store};

/// GC interval used when none is configured.
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(60);

/// Periodically evicts expired replay entries, old read timestamps and
/// finished transaction records from a [`Store`].
pub struct GcTask<E, G> {
    store: Arc<Store<E, G>>,
    interval: Duration,
}

impl<E: MvccEngine + 'static, G: ReplicaGroup> GcTask<E, G> {
    pub fn new(store: Arc<Store<E, G>>, interval: Duration) -> Self {
        let interval = if interval.is_zero() { DEFAULT_GC_INTERVAL } else { interval };
        GcTask { store, interval }
    }

    /// One pass over every range.
    pub async fn run_once(&self) -> GcReport {
        self.store.gc().await
    }

    /// Runs the GC loop until the task is cancelled. The first pass happens
    /// one interval after start.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let report = self.run_once().await;
            if report != GcReport::default() {
                tracing::debug!(
                    responses = report.responses,
                    reads = report.reads,
                    txns = report.txns,
                    "gc evicted entries"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use cairn_api::{IncrementRequest, RequestHeader, Response};
    use cairn_consensus::LocalGroup;
    use cairn_storage::MemEngine;
    use cairn_types::{ClientCmdId, IsolationType};

    use super::*;
    use crate::client::KvClient;
    use crate::clock::{Clock, ManualClock};
    use crate::store::StoreConfig;

    #[tokio::test]
    async fn gc_evicts_after_window() {
        let manual = ManualClock::new(1_000_000_000);
        let clock = Clock::new(Arc::new(manual.clone()), Duration::from_millis(1));
        let mut config = StoreConfig::new(1, 1, Duration::from_millis(1));
        config.replay_window = Duration::from_secs(10);
        let store = Arc::new(Store::with_clock(config, MemEngine::new(), LocalGroup::default(), clock).unwrap());
        let client = KvClient::new(store.clone());

        let req = IncrementRequest { header: RequestHeader::new("n").with_cmd_id(ClientCmdId::new(1, 1)), increment: 1 };
        client.send(req.into()).await;
        let mut txn = client.begin("t", "n", IsolationType::Snapshot);
        txn.increment("m", 1).await.unwrap();
        txn.commit().await.unwrap();

        let task = GcTask::new(store.clone(), Duration::from_secs(1));
        let report = task.run_once().await;
        assert_eq!(report.responses, 0);
        assert_eq!(report.txns, 0);

        manual.advance(Duration::from_secs(11));
        let report = task.run_once().await;
        // The increment plus the transaction's own requests.
        assert!(report.responses >= 1);
        assert_eq!(report.txns, 1);
        assert!(store.txns().is_empty());

        let again = IncrementRequest { header: RequestHeader::new("n").with_cmd_id(ClientCmdId::new(1, 1)), increment: 1 };
        let Response::Increment(r) = client.send(again.into()).await else { panic!("expected increment response") };
        assert_eq!(r.new_value, 2);
    }
}
