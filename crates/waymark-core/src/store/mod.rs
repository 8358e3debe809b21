//! Local store
//!
//! A single `SQLite` file with one table per [`Collection`]. Values are JSON
//! documents; keys are text except for the auto-increment outbox.
//!
//! The connection sits behind a `tokio::sync::Mutex`; multi-collection
//! writes go through [`LocalStore::with_transaction`], which takes the
//! database write lock (`BEGIN IMMEDIATE`) for the whole closure.

mod cascade;
mod collection;
pub(crate) mod schema;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::util::timestamp_now;

pub use cascade::CascadeReport;
pub(crate) use cascade::{cascade_delete_in, remove_ancillary};
pub use collection::{attachment_key, pack_key, record_prefix, Collection};
pub use schema::MAX_SELF_HEAL_ATTEMPTS;

/// Meta key holding the id of the record the user currently has open.
pub const CURRENT_RECORD_KEY: &str = "current_record_id";

/// Options applied when opening a store.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// How long to wait for another connection's write lock
    pub busy_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Thread-safe handle to the local store.
#[derive(Clone)]
pub struct LocalStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl LocalStore {
    /// Open (or create) the store at `path` and heal its schema.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with(path, StoreOptions::default()).await
    }

    pub async fn open_with(path: impl Into<PathBuf>, options: StoreOptions) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let open_path = path.clone();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let mut conn = Connection::open(&open_path)?;
            configure(&conn, &options)?;
            schema::ensure_collections(&mut conn)?;
            Ok(conn)
        })
        .await
        .map_err(|error| Error::Io(std::io::Error::other(error)))??;

        tracing::debug!(path = %path.display(), "Opened local store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        configure(&conn, &StoreOptions::default())?;
        schema::ensure_collections(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Backing file, or `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current `user_version` of the schema.
    pub async fn schema_version(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        schema::user_version(&conn)
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        collection: Collection,
        key: &str,
    ) -> Result<Option<T>> {
        let conn = self.conn.lock().await;
        get_in(&conn, collection, key)
    }

    /// Upsert `value`. Without an explicit key the value's `id` field is
    /// used; auto-increment collections append instead. Returns the key.
    pub async fn put<T: Serialize>(
        &self,
        collection: Collection,
        value: &T,
        key: Option<&str>,
    ) -> Result<String> {
        let conn = self.conn.lock().await;
        put_in(&conn, collection, value, key)
    }

    /// Remove a row. Returns whether it existed.
    pub async fn delete(&self, collection: Collection, key: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        delete_in(&conn, collection, key)
    }

    pub async fn get_all<T: DeserializeOwned>(&self, collection: Collection) -> Result<Vec<T>> {
        Ok(self
            .entries(collection)
            .await?
            .into_iter()
            .map(|(_, value)| value)
            .collect())
    }

    /// All rows with their keys, in key order (outbox: `created_at`, key).
    pub async fn entries<T: DeserializeOwned>(
        &self,
        collection: Collection,
    ) -> Result<Vec<(String, T)>> {
        let conn = self.conn.lock().await;
        entries_in(&conn, collection, None)
    }

    pub async fn scan_prefix<T: DeserializeOwned>(
        &self,
        collection: Collection,
        prefix: &str,
    ) -> Result<Vec<(String, T)>> {
        let conn = self.conn.lock().await;
        entries_in(&conn, collection, Some(prefix))
    }

    pub async fn delete_prefix(&self, collection: Collection, prefix: &str) -> Result<usize> {
        let conn = self.conn.lock().await;
        delete_prefix_in(&conn, collection, prefix)
    }

    /// Append to an auto-increment collection and return the new key.
    pub async fn append<T: Serialize>(
        &self,
        collection: Collection,
        value: &T,
        created_at: &str,
    ) -> Result<i64> {
        let conn = self.conn.lock().await;
        append_in(&conn, collection, value, created_at)
    }

    pub async fn count(&self, collection: Collection) -> Result<usize> {
        let conn = self.conn.lock().await;
        count_in(&conn, collection)
    }

    /// Run `f` with exclusive write access to `scope`.
    ///
    /// All writes commit together when `f` returns `Ok`; an error rolls
    /// everything back. Touching a collection outside `scope` is an error.
    ///
    /// `f` runs on the calling task because it borrows caller state. Keep it
    /// to short local reads and writes. Opening goes through
    /// `spawn_blocking` since schema healing may wait out the busy timeout.
    pub async fn with_transaction<T, F>(&self, scope: &[Collection], f: F) -> Result<T>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T>,
    {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let store_tx = StoreTx { conn: &tx, scope };
        let value = f(&store_tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Id of the record the user has open, if any.
    pub async fn current_record(&self) -> Result<Option<String>> {
        self.get(Collection::Meta, CURRENT_RECORD_KEY).await
    }

    pub async fn set_current_record(&self, record_id: Option<&str>) -> Result<()> {
        match record_id {
            Some(id) => {
                self.put(Collection::Meta, &id, Some(CURRENT_RECORD_KEY))
                    .await?;
            }
            None => {
                self.delete(Collection::Meta, CURRENT_RECORD_KEY).await?;
            }
        }
        Ok(())
    }

    /// Delete a primary record and everything keyed under it.
    pub async fn delete_record_cascade(&self, record_id: &str) -> Result<CascadeReport> {
        let mut report = self
            .with_transaction(
                &[Collection::Plans, Collection::Packs, Collection::Meta],
                |tx| cascade_delete_in(tx, record_id),
            )
            .await?;
        report.ancillary_removed = remove_ancillary(self, record_id).await;
        Ok(report)
    }
}

/// Collection access inside [`LocalStore::with_transaction`].
pub struct StoreTx<'a> {
    conn: &'a Connection,
    scope: &'a [Collection],
}

impl StoreTx<'_> {
    fn check(&self, collection: Collection) -> Result<()> {
        if self.scope.contains(&collection) {
            Ok(())
        } else {
            Err(Error::InvalidInput(format!(
                "collection '{collection}' is not part of this transaction"
            )))
        }
    }

    pub fn get<T: DeserializeOwned>(&self, collection: Collection, key: &str) -> Result<Option<T>> {
        self.check(collection)?;
        get_in(self.conn, collection, key)
    }

    pub fn put<T: Serialize>(
        &self,
        collection: Collection,
        value: &T,
        key: Option<&str>,
    ) -> Result<String> {
        self.check(collection)?;
        put_in(self.conn, collection, value, key)
    }

    pub fn delete(&self, collection: Collection, key: &str) -> Result<bool> {
        self.check(collection)?;
        delete_in(self.conn, collection, key)
    }

    pub fn get_all<T: DeserializeOwned>(&self, collection: Collection) -> Result<Vec<T>> {
        Ok(self
            .entries(collection)?
            .into_iter()
            .map(|(_, value)| value)
            .collect())
    }

    pub fn entries<T: DeserializeOwned>(&self, collection: Collection) -> Result<Vec<(String, T)>> {
        self.check(collection)?;
        entries_in(self.conn, collection, None)
    }

    pub fn scan_prefix<T: DeserializeOwned>(
        &self,
        collection: Collection,
        prefix: &str,
    ) -> Result<Vec<(String, T)>> {
        self.check(collection)?;
        entries_in(self.conn, collection, Some(prefix))
    }

    pub fn delete_prefix(&self, collection: Collection, prefix: &str) -> Result<usize> {
        self.check(collection)?;
        delete_prefix_in(self.conn, collection, prefix)
    }

    pub fn append<T: Serialize>(
        &self,
        collection: Collection,
        value: &T,
        created_at: &str,
    ) -> Result<i64> {
        self.check(collection)?;
        append_in(self.conn, collection, value, created_at)
    }
}

fn configure(conn: &Connection, options: &StoreOptions) -> Result<()> {
    conn.busy_timeout(options.busy_timeout)?;
    // In-memory databases report "memory" and keep their journal mode.
    if let Err(error) = conn.query_row("PRAGMA journal_mode = WAL", [], |row| {
        row.get::<_, String>(0)
    }) {
        tracing::debug!("Could not enable WAL journal mode: {error}");
    }
    conn.execute_batch(
        "PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;",
    )?;
    Ok(())
}

fn get_in<T: DeserializeOwned>(
    conn: &Connection,
    collection: Collection,
    key: &str,
) -> Result<Option<T>> {
    let sql = format!(
        "SELECT value FROM {} WHERE CAST(key AS TEXT) = ?1",
        collection.name()
    );
    let raw: Option<String> = conn
        .query_row(&sql, params![key], |row| row.get(0))
        .optional()?;
    raw.map(|raw| decode(&raw)).transpose()
}

fn put_in<T: Serialize>(
    conn: &Connection,
    collection: Collection,
    value: &T,
    key: Option<&str>,
) -> Result<String> {
    let json = serde_json::to_value(value)?;
    let raw = serde_json::to_string(&json)?;

    if collection.is_auto_increment() {
        let created_at = json
            .get("created_at")
            .and_then(Value::as_str)
            .map_or_else(timestamp_now, str::to_string);
        let Some(key) = key else {
            let id = append_raw(conn, collection, &created_at, &raw)?;
            return Ok(id.to_string());
        };
        let id: i64 = key.parse().map_err(|_| {
            Error::InvalidInput(format!("'{key}' is not a valid {collection} key"))
        })?;
        let sql = format!(
            "INSERT INTO {} (key, created_at, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET created_at = excluded.created_at, value = excluded.value",
            collection.name()
        );
        conn.execute(&sql, params![id, created_at, raw])?;
        return Ok(id.to_string());
    }

    let key = match key {
        Some(key) => key.to_string(),
        None => extract_id(&json).ok_or_else(|| {
            Error::InvalidInput(format!("value written to {collection} has no id"))
        })?,
    };
    let sql = format!(
        "INSERT INTO {} (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        collection.name()
    );
    conn.execute(&sql, params![key, raw])?;
    Ok(key)
}

fn append_in<T: Serialize>(
    conn: &Connection,
    collection: Collection,
    value: &T,
    created_at: &str,
) -> Result<i64> {
    if !collection.is_auto_increment() {
        return Err(Error::InvalidInput(format!(
            "{collection} does not assign keys"
        )));
    }
    let raw = serde_json::to_string(value)?;
    append_raw(conn, collection, created_at, &raw)
}

fn append_raw(conn: &Connection, collection: Collection, created_at: &str, raw: &str) -> Result<i64> {
    let sql = format!(
        "INSERT INTO {} (created_at, value) VALUES (?1, ?2)",
        collection.name()
    );
    conn.execute(&sql, params![created_at, raw])?;
    Ok(conn.last_insert_rowid())
}

fn delete_in(conn: &Connection, collection: Collection, key: &str) -> Result<bool> {
    let sql = format!(
        "DELETE FROM {} WHERE CAST(key AS TEXT) = ?1",
        collection.name()
    );
    Ok(conn.execute(&sql, params![key])? > 0)
}

fn entries_in<T: DeserializeOwned>(
    conn: &Connection,
    collection: Collection,
    prefix: Option<&str>,
) -> Result<Vec<(String, T)>> {
    let order = if collection.is_auto_increment() {
        "created_at, key"
    } else {
        "key"
    };
    let filter = if prefix.is_some() {
        "WHERE substr(CAST(key AS TEXT), 1, length(?1)) = ?1"
    } else {
        ""
    };
    let sql = format!(
        "SELECT CAST(key AS TEXT), value FROM {} {filter} ORDER BY {order}",
        collection.name()
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = match prefix {
        Some(prefix) => stmt
            .query_map(params![prefix], key_value_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?,
        None => stmt
            .query_map([], key_value_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?,
    };

    rows.into_iter()
        .map(|(key, raw)| Ok((key, decode(&raw)?)))
        .collect()
}

fn key_value_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String)> {
    Ok((row.get(0)?, row.get(1)?))
}

fn delete_prefix_in(conn: &Connection, collection: Collection, prefix: &str) -> Result<usize> {
    let sql = format!(
        "DELETE FROM {} WHERE substr(CAST(key AS TEXT), 1, length(?1)) = ?1",
        collection.name()
    );
    Ok(conn.execute(&sql, params![prefix])?)
}

fn count_in(conn: &Connection, collection: Collection) -> Result<usize> {
    let sql = format!("SELECT COUNT(*) FROM {}", collection.name());
    let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
    Ok(usize::try_from(count).unwrap_or_default())
}

fn decode<T: DeserializeOwned>(raw: &str) -> Result<T> {
    Ok(serde_json::from_str(raw)?)
}

fn extract_id(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::String(id) if !id.trim().is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}
