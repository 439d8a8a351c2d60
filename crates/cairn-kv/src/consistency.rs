use cairn_api::RequestHeader;
use cairn_types::{CairnError, ReadConsistency};

/// How a command must be served, resolved from its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPolicy {
    /// Mutations: lease required, read consistency ignored.
    Write,
    LeaseRead,
    /// Lease plus quorum confirmation.
    QuorumRead,
    /// No lease check; pending intents are skipped.
    StaleRead,
}

impl ReadPolicy {
    pub fn resolve(header: &RequestHeader, is_read_only: bool) -> Result<ReadPolicy, CairnError> {
        if !is_read_only {
            return Ok(ReadPolicy::Write);
        }
        match header.read_consistency {
            ReadConsistency::Consistent => Ok(ReadPolicy::LeaseRead),
            ReadConsistency::Consensus => Ok(ReadPolicy::QuorumRead),
            ReadConsistency::Inconsistent if header.txn.is_some() => Err(CairnError::InvalidArgument(
                "inconsistent reads are not allowed within a transaction".into(),
            )),
            ReadConsistency::Inconsistent => Ok(ReadPolicy::StaleRead),
        }
    }

    pub fn requires_lease(&self) -> bool {
        !matches!(self, ReadPolicy::StaleRead)
    }

    pub fn requires_quorum(&self) -> bool {
        matches!(self, ReadPolicy::QuorumRead)
    }

    pub fn observes_intents(&self) -> bool {
        !matches!(self, ReadPolicy::StaleRead)
    }
}
