//! Local record mutations
//!
//! Every mutation writes the record and its outbox entry in one store
//! transaction, so a crash can never leave a change that will not sync.

use chrono::Utc;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{OutboxOp, OutboxOperation, Record, LABEL_FIELD};
use crate::outbox::OutboxQueue;
use crate::store::{cascade_delete_in, remove_ancillary, CascadeReport, Collection, LocalStore};

#[derive(Debug, Clone)]
pub struct RecordService {
    store: LocalStore,
    outbox: OutboxQueue,
}

impl RecordService {
    pub const fn new(store: LocalStore, outbox: OutboxQueue) -> Self {
        Self { store, outbox }
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    pub const fn outbox(&self) -> &OutboxQueue {
        &self.outbox
    }

    pub async fn get(&self, record_id: &str) -> Result<Option<Record>> {
        self.store.get(Collection::Plans, record_id).await
    }

    pub async fn list(&self) -> Result<Vec<Record>> {
        self.store.get_all(Collection::Plans).await
    }

    /// Stamp and store `record`, queueing an upsert unless one is already
    /// pending after the record's last queued delete.
    pub async fn save_record(&self, mut record: Record) -> Result<Record> {
        if record.id.trim().is_empty() {
            return Err(Error::InvalidInput("record id must not be empty".to_string()));
        }
        record.touch(Utc::now());

        self.store
            .with_transaction(&[Collection::Plans, Collection::Outbox], |tx| {
                tx.put(Collection::Plans, &record, Some(&record.id))?;
                if !self.outbox.has_queued_upsert_in(tx, &record.id)? {
                    self.outbox
                        .enqueue_in(tx, &record.id, OutboxOperation::Upsert)?;
                }
                Ok(())
            })
            .await?;

        tracing::debug!(record_id = %record.id, "Saved record");
        Ok(record)
    }

    /// Cascade-delete locally and queue the remote delete.
    pub async fn delete_record(&self, record_id: &str) -> Result<CascadeReport> {
        let mut report = self
            .store
            .with_transaction(
                &[
                    Collection::Plans,
                    Collection::Packs,
                    Collection::Meta,
                    Collection::Outbox,
                ],
                |tx| {
                    let report = cascade_delete_in(tx, record_id)?;
                    self.outbox
                        .enqueue_in(tx, record_id, OutboxOperation::Delete)?;
                    Ok(report)
                },
            )
            .await?;
        report.ancillary_removed = remove_ancillary(&self.store, record_id).await;

        tracing::debug!(
            record_id,
            packs_removed = report.packs_removed,
            "Deleted record"
        );
        Ok(report)
    }

    /// Rename a record and queue a label update.
    pub async fn update_label(&self, record_id: &str, label: &str) -> Result<Record> {
        let label = label.trim();
        if label.is_empty() {
            return Err(Error::InvalidInput("label must not be empty".to_string()));
        }

        self.store
            .with_transaction(&[Collection::Plans, Collection::Outbox], |tx| {
                let mut record: Record = tx
                    .get(Collection::Plans, record_id)?
                    .ok_or_else(|| Error::NotFound(format!("record {record_id}")))?;
                record
                    .fields
                    .insert(LABEL_FIELD.to_string(), Value::String(label.to_string()));
                record.touch(Utc::now());
                tx.put(Collection::Plans, &record, Some(record_id))?;
                self.outbox.enqueue_in(
                    tx,
                    record_id,
                    OutboxOperation::LabelUpdate {
                        label: label.to_string(),
                    },
                )?;
                Ok(record)
            })
            .await
    }

    /// Queue `op` without touching the record. A second upsert for the
    /// same record is skipped while one is pending.
    pub async fn enqueue_op(&self, record_id: &str, op: OutboxOperation) -> Result<Option<OutboxOp>> {
        self.store
            .with_transaction(&[Collection::Outbox], |tx| {
                if matches!(op, OutboxOperation::Upsert)
                    && self.outbox.has_queued_upsert_in(tx, record_id)?
                {
                    return Ok(None);
                }
                self.outbox.enqueue_in(tx, record_id, op).map(Some)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OpKind;
    use crate::store::pack_key;
    use pretty_assertions::assert_eq;

    async fn service() -> RecordService {
        let store = LocalStore::open_in_memory().await.unwrap();
        RecordService::new(store.clone(), OutboxQueue::new(store))
    }

    fn kinds(ops: &[OutboxOp]) -> Vec<(String, OpKind)> {
        ops.iter()
            .map(|op| (op.record_id.clone(), op.kind()))
            .collect()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn repeated_saves_queue_one_upsert() {
        let service = service().await;
        for label in ["a", "b", "c"] {
            service
                .save_record(Record::new("p1").with_field("label", label))
                .await
                .unwrap();
        }
        service.save_record(Record::new("p2")).await.unwrap();

        let ops = service.outbox().pending_ops().await.unwrap();
        assert_eq!(
            kinds(&ops),
            vec![
                ("p1".to_string(), OpKind::Upsert),
                ("p2".to_string(), OpKind::Upsert)
            ]
        );
        let stored = service.get("p1").await.unwrap().unwrap();
        assert_eq!(stored.label(), Some("c"));
        assert!(stored.updated_at.is_some());
        assert_eq!(stored.updated_at, stored.local_saved_at);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn save_rejects_blank_id() {
        let service = service().await;
        let error = service.save_record(Record::new("  ")).await.unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
        assert_eq!(service.outbox().pending_count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_cascades_and_queues_delete() {
        let service = service().await;
        service.save_record(Record::new("p1")).await.unwrap();
        service
            .store()
            .put(Collection::Packs, &serde_json::json!({}), Some(&pack_key("p1", "route")))
            .await
            .unwrap();

        let report = service.delete_record("p1").await.unwrap();

        assert!(report.removed_primary);
        assert_eq!(report.packs_removed, 1);
        assert!(service.get("p1").await.unwrap().is_none());
        let ops = service.outbox().pending_ops().await.unwrap();
        assert_eq!(
            kinds(&ops),
            vec![
                ("p1".to_string(), OpKind::Upsert),
                ("p1".to_string(), OpKind::Delete)
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn recreating_a_deleted_record_queues_a_fresh_upsert() {
        let service = service().await;
        service.save_record(Record::new("p1")).await.unwrap();
        service.delete_record("p1").await.unwrap();
        service.save_record(Record::new("p1")).await.unwrap();
        service.save_record(Record::new("p1")).await.unwrap();

        let ops = service.outbox().pending_ops().await.unwrap();
        assert_eq!(
            kinds(&ops),
            vec![
                ("p1".to_string(), OpKind::Upsert),
                ("p1".to_string(), OpKind::Delete),
                ("p1".to_string(), OpKind::Upsert)
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_label_touches_record_and_queues_op() {
        let service = service().await;
        let saved = service
            .save_record(Record::new("p1").with_field("label", "Old"))
            .await
            .unwrap();

        let renamed = service.update_label("p1", "  Ridge loop ").await.unwrap();

        assert_eq!(renamed.label(), Some("Ridge loop"));
        assert!(renamed.updated_at >= saved.updated_at);
        let last = service.outbox().pending_ops().await.unwrap().pop().unwrap();
        assert_eq!(
            last.op,
            OutboxOperation::LabelUpdate {
                label: "Ridge loop".to_string()
            }
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_label_on_missing_record_is_not_found() {
        let service = service().await;
        let error = service.update_label("ghost", "x").await.unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));
        assert_eq!(service.outbox().pending_count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn enqueue_op_dedups_upserts_only() {
        let service = service().await;
        assert!(service
            .enqueue_op("p1", OutboxOperation::Upsert)
            .await
            .unwrap()
            .is_some());
        assert!(service
            .enqueue_op("p1", OutboxOperation::Upsert)
            .await
            .unwrap()
            .is_none());
        assert!(service
            .enqueue_op("p1", OutboxOperation::Delete)
            .await
            .unwrap()
            .is_some());
    }
}
