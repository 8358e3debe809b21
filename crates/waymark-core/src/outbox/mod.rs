//! Outbox queue
//!
//! Pending remote operations, persisted in [`Collection::Outbox`] and
//! delivered in `created_at` order. Failed entries are retried on later
//! drain passes until they reach the retry ceiling, after which they stay
//! visible as dead letters until purged.

use crate::error::Result;
use crate::models::{OpKind, OutboxOp, OutboxOperation};
use crate::store::{Collection, LocalStore, StoreTx};
use crate::util::{compact_text, timestamp_now};

/// Default delivery attempts before an entry is dead-lettered.
pub const MAX_RETRIES: u32 = 5;

#[derive(Debug, Clone)]
pub struct OutboxQueue {
    store: LocalStore,
    max_retries: u32,
}

impl OutboxQueue {
    pub const fn new(store: LocalStore) -> Self {
        Self {
            store,
            max_retries: MAX_RETRIES,
        }
    }

    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Append an operation with `retries = 0`.
    pub async fn enqueue(&self, record_id: &str, op: OutboxOperation) -> Result<OutboxOp> {
        self.store
            .with_transaction(&[Collection::Outbox], |tx| {
                self.enqueue_in(tx, record_id, op)
            })
            .await
    }

    /// [`Self::enqueue`] inside a caller's transaction.
    pub fn enqueue_in(
        &self,
        tx: &StoreTx<'_>,
        record_id: &str,
        op: OutboxOperation,
    ) -> Result<OutboxOp> {
        self.enqueue_at_in(tx, record_id, op, timestamp_now())
    }

    pub(crate) fn enqueue_at_in(
        &self,
        tx: &StoreTx<'_>,
        record_id: &str,
        op: OutboxOperation,
        created_at: String,
    ) -> Result<OutboxOp> {
        let mut entry = OutboxOp {
            id: 0,
            record_id: record_id.to_string(),
            op,
            created_at,
            retries: 0,
            last_error: None,
        };
        entry.id = tx.append(Collection::Outbox, &entry, &entry.created_at)?;
        tracing::debug!(
            op_id = entry.id,
            record_id,
            kind = entry.kind().label(),
            "Queued outbox operation"
        );
        Ok(entry)
    }

    /// Whether an upsert for `record_id` is pending after its last pending
    /// delete. An upsert queued before a delete does not count, since the
    /// delete would remove whatever it uploads.
    pub async fn has_queued_upsert(&self, record_id: &str) -> Result<bool> {
        Ok(upsert_follows_last_delete(&self.pending_ops().await?, record_id))
    }

    pub fn has_queued_upsert_in(&self, tx: &StoreTx<'_>, record_id: &str) -> Result<bool> {
        Ok(upsert_follows_last_delete(&self.pending_ops_in(tx)?, record_id))
    }

    /// Deliverable entries, oldest first.
    pub async fn pending_ops(&self) -> Result<Vec<OutboxOp>> {
        Ok(self
            .all_ops()
            .await?
            .into_iter()
            .filter(|op| !op.is_dead(self.max_retries))
            .collect())
    }

    pub fn pending_ops_in(&self, tx: &StoreTx<'_>) -> Result<Vec<OutboxOp>> {
        Ok(load(tx.entries(Collection::Outbox)?)
            .into_iter()
            .filter(|op| !op.is_dead(self.max_retries))
            .collect())
    }

    /// Entries at the retry ceiling, oldest first.
    pub async fn dead_letters(&self) -> Result<Vec<OutboxOp>> {
        Ok(self
            .all_ops()
            .await?
            .into_iter()
            .filter(|op| op.is_dead(self.max_retries))
            .collect())
    }

    pub async fn all_ops(&self) -> Result<Vec<OutboxOp>> {
        Ok(load(self.store.entries(Collection::Outbox).await?))
    }

    pub async fn get(&self, op_id: i64) -> Result<Option<OutboxOp>> {
        let op: Option<OutboxOp> = self
            .store
            .get(Collection::Outbox, &op_id.to_string())
            .await?;
        Ok(op.map(|op| OutboxOp { id: op_id, ..op }))
    }

    /// Remove a delivered entry.
    pub async fn remove(&self, op_id: i64) -> Result<bool> {
        self.store
            .with_transaction(&[Collection::Outbox], |tx| self.remove_in(tx, op_id))
            .await
    }

    pub fn remove_in(&self, tx: &StoreTx<'_>, op_id: i64) -> Result<bool> {
        tx.delete(Collection::Outbox, &op_id.to_string())
    }

    /// Record a failed delivery attempt. The entry is never deleted here.
    pub async fn mark_failed(&self, op_id: i64, error: &str) -> Result<Option<OutboxOp>> {
        self.store
            .with_transaction(&[Collection::Outbox], |tx| {
                self.mark_failed_in(tx, op_id, error)
            })
            .await
    }

    pub fn mark_failed_in(
        &self,
        tx: &StoreTx<'_>,
        op_id: i64,
        error: &str,
    ) -> Result<Option<OutboxOp>> {
        self.record_failure_in(tx, op_id, error, false)
    }

    /// Record a failure that retrying cannot fix, moving the entry straight
    /// to the dead letters.
    pub async fn dead_letter(&self, op_id: i64, error: &str) -> Result<Option<OutboxOp>> {
        self.store
            .with_transaction(&[Collection::Outbox], |tx| {
                self.dead_letter_in(tx, op_id, error)
            })
            .await
    }

    pub fn dead_letter_in(
        &self,
        tx: &StoreTx<'_>,
        op_id: i64,
        error: &str,
    ) -> Result<Option<OutboxOp>> {
        self.record_failure_in(tx, op_id, error, true)
    }

    fn record_failure_in(
        &self,
        tx: &StoreTx<'_>,
        op_id: i64,
        error: &str,
        permanent: bool,
    ) -> Result<Option<OutboxOp>> {
        let key = op_id.to_string();
        let Some(mut op) = tx.get::<OutboxOp>(Collection::Outbox, &key)? else {
            return Ok(None);
        };
        op.id = op_id;
        op.retries = op.retries.saturating_add(1);
        if permanent {
            op.retries = op.retries.max(self.max_retries);
        }
        op.last_error = Some(compact_text(error));
        tx.put(Collection::Outbox, &op, Some(&key))?;

        if op.is_dead(self.max_retries) {
            tracing::warn!(
                op_id,
                record_id = %op.record_id,
                kind = op.kind().label(),
                retries = op.retries,
                permanent,
                "Outbox operation dead-lettered: {error}"
            );
        }
        Ok(Some(op))
    }

    /// Delete every dead-lettered entry and return how many were removed.
    pub async fn purge_dead_letter(&self) -> Result<usize> {
        let purged = self
            .store
            .with_transaction(&[Collection::Outbox], |tx| self.purge_dead_letter_in(tx))
            .await?;
        if purged > 0 {
            tracing::info!(purged, "Purged dead-lettered outbox operations");
        }
        Ok(purged)
    }

    pub fn purge_dead_letter_in(&self, tx: &StoreTx<'_>) -> Result<usize> {
        let mut purged = 0;
        for op in load(tx.entries(Collection::Outbox)?) {
            if op.is_dead(self.max_retries) && self.remove_in(tx, op.id)? {
                purged += 1;
            }
        }
        Ok(purged)
    }

    pub async fn pending_count(&self) -> Result<usize> {
        Ok(self.pending_ops().await?.len())
    }

    pub async fn dead_letter_count(&self) -> Result<usize> {
        Ok(self.dead_letters().await?.len())
    }
}

fn upsert_follows_last_delete(pending: &[OutboxOp], record_id: &str) -> bool {
    pending
        .iter()
        .filter(|op| op.record_id == record_id)
        .fold(false, |queued, op| match op.kind() {
            OpKind::Upsert => true,
            OpKind::Delete => false,
            _ => queued,
        })
}

fn load(entries: Vec<(String, OutboxOp)>) -> Vec<OutboxOp> {
    entries
        .into_iter()
        .filter_map(|(key, op)| match key.parse() {
            Ok(id) => Some(OutboxOp { id, ..op }),
            Err(_) => {
                tracing::warn!(key, "Skipping outbox row with a non-numeric key");
                None
            }
        })
        .collect()
}
