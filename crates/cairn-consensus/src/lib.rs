use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;

use cairn_types::{CairnError, NodeId, RaftId, RangeDescriptor};

// ---------------------------------------------------------------------------
// ReplicaGroup trait
// The replication protocol behind a range is external; this is the authority
// the command path asks before serving. RPITIT futures carry `+ Send` so that
// generic callers can `.await` across thread boundaries.
// ---------------------------------------------------------------------------

pub trait ReplicaGroup: Send + Sync + 'static {
    fn node_id(&self) -> NodeId;

    /// Whether this replica currently holds the range lease.
    fn has_lease(
        &self,
        desc: &RangeDescriptor,
    ) -> impl std::future::Future<Output = Result<bool, CairnError>> + Send;

    /// Confirms with a quorum of the group that this replica's view is current.
    ///
    /// Fails with `ConsensusUnavailable` when no confirmation can be obtained.
    fn confirm_quorum(
        &self,
        desc: &RangeDescriptor,
    ) -> impl std::future::Future<Output = Result<(), CairnError>> + Send;
}

// ---------------------------------------------------------------------------
// LocalGroup: single node, holds every lease unless revoked
// ---------------------------------------------------------------------------

pub struct LocalGroup {
    node_id: NodeId,
    consensus_reads: bool,
    revoked: Arc<RwLock<HashSet<RaftId>>>,
}

impl LocalGroup {
    pub fn new(node_id: NodeId, consensus_reads: bool) -> Self {
        LocalGroup { node_id, consensus_reads, revoked: Arc::new(RwLock::new(HashSet::new())) }
    }

    pub async fn revoke_lease(&self, raft_id: RaftId) {
        self.revoked.write().await.insert(raft_id);
    }

    pub async fn restore_lease(&self, raft_id: RaftId) {
        self.revoked.write().await.remove(&raft_id);
    }
}

impl Default for LocalGroup {
    fn default() -> Self {
        Self::new(1, false)
    }
}

impl ReplicaGroup for LocalGroup {
    fn node_id(&self) -> NodeId {
        self.node_id
    }

    async fn has_lease(&self, desc: &RangeDescriptor) -> Result<bool, CairnError> {
        Ok(!self.revoked.read().await.contains(&desc.raft_id))
    }

    async fn confirm_quorum(&self, desc: &RangeDescriptor) -> Result<(), CairnError> {
        if !self.consensus_reads || self.revoked.read().await.contains(&desc.raft_id) {
            return Err(CairnError::ConsensusUnavailable { raft_id: desc.raft_id });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(raft_id: RaftId) -> RangeDescriptor {
        RangeDescriptor { raft_id, start_key: vec![], end_key: b"\xff\xff".to_vec(), replicas: vec![] }
    }

    #[tokio::test]
    async fn local_group_holds_every_lease() {
        let g = LocalGroup::default();
        assert_eq!(g.node_id(), 1);
        assert!(g.has_lease(&desc(1)).await.unwrap());
        assert!(g.has_lease(&desc(42)).await.unwrap());
    }

    #[tokio::test]
    async fn quorum_reads_disabled_by_default() {
        let g = LocalGroup::default();
        assert!(matches!(
            g.confirm_quorum(&desc(1)).await,
            Err(CairnError::ConsensusUnavailable { raft_id: 1 })
        ));

        let g = LocalGroup::new(1, true);
        assert!(g.confirm_quorum(&desc(1)).await.is_ok());
    }

    #[tokio::test]
    async fn revoked_lease() {
        let g = LocalGroup::new(3, true);
        g.revoke_lease(7).await;
        assert!(!g.has_lease(&desc(7)).await.unwrap());
        assert!(g.confirm_quorum(&desc(7)).await.is_err());
        assert!(g.has_lease(&desc(8)).await.unwrap());
        g.restore_lease(7).await;
        assert!(g.has_lease(&desc(7)).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn parallel_lease_checks() {
        let g = Arc::new(LocalGroup::new(1, true));
        let mut handles = Vec::new();
        for n in 0..100u64 {
            let g = g.clone();
            handles.push(tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(rand::random::<u64>() % 10)).await;
                if n % 2 == 0 {
                    g.revoke_lease(n).await;
                }
                g.has_lease(&desc(n)).await.unwrap()
            }));
        }
        let mut held = 0;
        for h in handles {
            if h.await.unwrap() {
                held += 1;
            }
        }
        assert_eq!(held, 50);
    }
}
