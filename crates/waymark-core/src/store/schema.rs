//! Self-healing schema creation
//!
//! The store never migrates data in place. Opening it guarantees that every
//! [`Collection`] exists; any that are missing are created inside an
//! exclusive transaction that also bumps `PRAGMA user_version`.

use std::collections::HashSet;

use rusqlite::{Connection, ErrorCode, TransactionBehavior};

use super::Collection;
use crate::error::{Error, Result};

/// Upgrade attempts before opening the store fails.
pub const MAX_SELF_HEAL_ATTEMPTS: u32 = 3;

/// Create every missing collection, retrying up to
/// [`MAX_SELF_HEAL_ATTEMPTS`] times.
pub(crate) fn ensure_collections(conn: &mut Connection) -> Result<()> {
    let mut missing = missing_collections(conn)?;
    if missing.is_empty() {
        return Ok(());
    }

    for attempt in 1..=MAX_SELF_HEAL_ATTEMPTS {
        let version = user_version(conn)?;
        tracing::info!(
            attempt,
            version,
            missing = %names(&missing),
            "Local store is missing collections; upgrading schema"
        );
        upgrade(conn, version)?;

        missing = missing_collections(conn)?;
        if missing.is_empty() {
            tracing::info!(version = user_version(conn)?, "Local store schema is complete");
            return Ok(());
        }
        tracing::warn!(
            attempt,
            missing = %names(&missing),
            "Local store upgrade finished with collections still missing"
        );
    }

    Err(Error::SelfHealFailed {
        attempts: MAX_SELF_HEAL_ATTEMPTS,
        missing,
    })
}

/// Run one upgrade to `version + 1` under the database write lock.
///
/// Another connection may have finished the same upgrade while we waited
/// for the lock, so the missing set and version are read again inside it.
fn upgrade(conn: &mut Connection, probed_version: i64) -> Result<()> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|error| blocked_or_database(error, probed_version))?;

    let missing = missing_collections(&tx)?;
    if missing.is_empty() {
        tx.commit()?;
        return Ok(());
    }

    let version = user_version(&tx)?;
    for collection in &missing {
        for statement in collection.create_statements() {
            tx.execute(statement, [])?;
        }
        tracing::debug!(collection = collection.name(), "Created collection");
    }
    tx.pragma_update(None, "user_version", version + 1)?;
    tx.commit()
        .map_err(|error| blocked_or_database(error, version))?;
    Ok(())
}

/// Collections with no backing table.
pub(crate) fn missing_collections(conn: &Connection) -> Result<Vec<Collection>> {
    let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
    let tables = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<HashSet<_>, _>>()?;

    Ok(Collection::ALL
        .into_iter()
        .filter(|collection| !tables.contains(collection.name()))
        .collect())
}

pub(crate) fn user_version(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

fn blocked_or_database(error: rusqlite::Error, version: i64) -> Error {
    match &error {
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ) =>
        {
            tracing::warn!(version, "Local store upgrade is blocked: {error}");
            Error::UpgradeBlocked { version }
        }
        _ => Error::Database(error),
    }
}

fn names(collections: &[Collection]) -> String {
    collections
        .iter()
        .map(|collection| collection.name())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn creates_everything_on_a_blank_database() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(missing_collections(&conn).unwrap(), Collection::ALL.to_vec());

        ensure_collections(&mut conn).unwrap();

        assert!(missing_collections(&conn).unwrap().is_empty());
        assert_eq!(user_version(&conn).unwrap(), 1);
    }

    #[test]
    fn complete_schema_is_left_alone() {
        let mut conn = Connection::open_in_memory().unwrap();
        ensure_collections(&mut conn).unwrap();
        ensure_collections(&mut conn).unwrap();
        assert_eq!(user_version(&conn).unwrap(), 1);
    }

    #[test]
    fn heals_only_the_missing_collection_and_keeps_data() {
        let mut conn = Connection::open_in_memory().unwrap();
        ensure_collections(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO plans (key, value) VALUES ('p1', '{\"id\":\"p1\"}')",
            [],
        )
        .unwrap();
        conn.execute("DROP TABLE packs", []).unwrap();

        ensure_collections(&mut conn).unwrap();

        assert!(missing_collections(&conn).unwrap().is_empty());
        assert_eq!(user_version(&conn).unwrap(), 2);
        let kept: i64 = conn
            .query_row("SELECT COUNT(*) FROM plans", [], |row| row.get(0))
            .unwrap();
        assert_eq!(kept, 1);
    }

    #[test]
    fn held_write_lock_reports_upgrade_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocked.db");

        let holder = Connection::open(&path).unwrap();
        holder.execute_batch("BEGIN IMMEDIATE").unwrap();

        let mut conn = Connection::open(&path).unwrap();
        conn.busy_timeout(Duration::from_millis(50)).unwrap();
        let error = ensure_collections(&mut conn).unwrap_err();
        assert!(matches!(error, Error::UpgradeBlocked { version: 0 }));

        holder.execute_batch("ROLLBACK").unwrap();
        ensure_collections(&mut conn).unwrap();
        assert!(missing_collections(&conn).unwrap().is_empty());
    }
}
