//! Last-write-wins reconciliation of remote records into the local store

use crate::error::Result;
use crate::models::Record;
use crate::store::{Collection, StoreTx};

/// What to do with an incoming remote record.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeDecision {
    /// No local copy; store the remote record as-is
    Insert(Record),
    /// Remote is strictly newer; store the merged record
    Replace(Record),
    /// Local copy is as new or newer
    KeepLocal,
}

impl MergeDecision {
    pub const fn writes(&self) -> bool {
        !matches!(self, Self::KeepLocal)
    }
}

/// Compare the remote `updated_at` with the local best-known timestamp.
///
/// Ties go to the local copy. A remote record without a usable timestamp
/// never overwrites an existing local one.
pub fn resolve(local: Option<&Record>, remote: &Record) -> MergeDecision {
    let Some(local) = local else {
        return MergeDecision::Insert(remote.clone());
    };
    let Some(remote_at) = remote.remote_timestamp() else {
        return MergeDecision::KeepLocal;
    };
    match local.best_timestamp() {
        Some(local_at) if remote_at <= local_at => MergeDecision::KeepLocal,
        _ => MergeDecision::Replace(shallow_merge(local, remote)),
    }
}

/// Copy remote top-level fields onto the local record.
///
/// Fields the remote does not carry, including local-only ones, survive,
/// as does the local shadow timestamp.
pub fn shallow_merge(local: &Record, remote: &Record) -> Record {
    let mut merged = local.clone();
    if remote.owner_id.is_some() {
        merged.owner_id.clone_from(&remote.owner_id);
    }
    merged.updated_at.clone_from(&remote.updated_at);
    for (name, value) in &remote.fields {
        merged.fields.insert(name.clone(), value.clone());
    }
    merged
}

/// Resolve `remote` against the stored copy and write the winner.
/// Requires `Plans` in the transaction scope.
pub(crate) fn merge_in(tx: &StoreTx<'_>, remote: &Record) -> Result<MergeDecision> {
    let local: Option<Record> = tx.get(Collection::Plans, &remote.id)?;
    let decision = resolve(local.as_ref(), remote);
    match &decision {
        MergeDecision::Insert(record) | MergeDecision::Replace(record) => {
            tx.put(Collection::Plans, record, Some(&record.id))?;
        }
        MergeDecision::KeepLocal => {
            tracing::trace!(record_id = %remote.id, "Local copy is newer; skipped remote record");
        }
    }
    Ok(decision)
}
