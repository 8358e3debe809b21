//! Cascading record deletion

use super::{record_prefix, Collection, LocalStore, StoreTx, CURRENT_RECORD_KEY};
use crate::error::Result;

/// What a cascading delete removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeReport {
    /// Whether the primary row existed
    pub removed_primary: bool,
    pub packs_removed: usize,
    /// Whether the meta current-record pointer referenced the record
    pub cleared_current: bool,
    /// Best-effort ancillary rows removed after the transaction
    pub ancillary_removed: usize,
}

/// Delete the primary row, its packs and the current-record pointer.
///
/// Requires `Plans`, `Packs` and `Meta` in the transaction scope.
pub(crate) fn cascade_delete_in(tx: &StoreTx<'_>, record_id: &str) -> Result<CascadeReport> {
    let removed_primary = tx.delete(Collection::Plans, record_id)?;
    let packs_removed = tx.delete_prefix(Collection::Packs, &record_prefix(record_id))?;

    let current: Option<String> = tx.get(Collection::Meta, CURRENT_RECORD_KEY)?;
    let cleared_current = current.as_deref() == Some(record_id);
    if cleared_current {
        tx.delete(Collection::Meta, CURRENT_RECORD_KEY)?;
    }

    Ok(CascadeReport {
        removed_primary,
        packs_removed,
        cleared_current,
        ancillary_removed: 0,
    })
}

/// Remove cached attachments for a deleted record. Failures are logged.
pub(crate) async fn remove_ancillary(store: &LocalStore, record_id: &str) -> usize {
    match store
        .delete_prefix(Collection::Attachments, &record_prefix(record_id))
        .await
    {
        Ok(removed) => {
            if removed > 0 {
                tracing::debug!(record_id, removed, "Removed cached attachments");
            }
            removed
        }
        Err(error) => {
            tracing::warn!(record_id, "Failed to remove cached attachments: {error}");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use crate::models::Record;
    use crate::store::{attachment_key, pack_key};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn attachment_keys(store: &LocalStore, record_id: &str) -> Vec<String> {
        store
            .scan_prefix::<Value>(Collection::Attachments, &record_prefix(record_id))
            .await
            .unwrap()
            .into_iter()
            .map(|(key, _)| key)
            .collect()
    }

    async fn seeded_store() -> LocalStore {
        let store = LocalStore::open_in_memory().await.unwrap();
        for id in ["p1", "p2"] {
            store
                .put(Collection::Plans, &Record::new(id), None)
                .await
                .unwrap();
            store
                .put(Collection::Packs, &json!({}), Some(&pack_key(id, "route")))
                .await
                .unwrap();
            store
                .put(Collection::Packs, &json!({}), Some(&pack_key(id, "manifest")))
                .await
                .unwrap();
            store
                .put(
                    Collection::Attachments,
                    &json!({"bytes": 3}),
                    Some(&attachment_key(id, "cover.jpg")),
                )
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cascade_removes_only_the_target_record() {
        let store = seeded_store().await;
        store.set_current_record(Some("p1")).await.unwrap();

        let report = store.delete_record_cascade("p1").await.unwrap();

        assert_eq!(
            report,
            CascadeReport {
                removed_primary: true,
                packs_removed: 2,
                cleared_current: true,
                ancillary_removed: 1,
            }
        );
        assert_eq!(store.current_record().await.unwrap(), None);
        assert!(attachment_keys(&store, "p1").await.is_empty());

        let remaining: Vec<Record> = store.get_all(Collection::Plans).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "p2");
        assert_eq!(store.count(Collection::Packs).await.unwrap(), 2);
        assert_eq!(
            attachment_keys(&store, "p2").await,
            vec![attachment_key("p2", "cover.jpg")]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cascade_keeps_unrelated_current_pointer() {
        let store = seeded_store().await;
        store.set_current_record(Some("p2")).await.unwrap();

        let report = store.delete_record_cascade("p1").await.unwrap();

        assert!(!report.cleared_current);
        assert_eq!(store.current_record().await.unwrap().as_deref(), Some("p2"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cascade_of_missing_record_is_a_no_op() {
        let store = seeded_store().await;
        let report = store.delete_record_cascade("ghost").await.unwrap();
        assert_eq!(report, CascadeReport::default());
    }
}
