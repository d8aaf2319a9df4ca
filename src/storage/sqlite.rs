//! Durable [`BackingStore`] on top of a local `SQLite` file.
//!
//! Records and the queue snapshot share one `kv_store` table. The schema is
//! versioned through `PRAGMA user_version`; each entry of [`SCHEMA`] moves
//! the database up by one version and runs once per file.

use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use super::store::BackingStore;
use crate::config::Paths;
use crate::error::{StoreError, SyncError};

/// Schema steps, applied in order. Index `n` upgrades version `n` to `n + 1`.
const SCHEMA: &[&str] = &[r"
    CREATE TABLE IF NOT EXISTS kv_store (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
"];

/// Key/value store persisted in the `kv_store` table.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open the store at `paths.database`, creating the data directory first.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, the file cannot
    /// be opened, or the schema upgrade fails.
    pub fn open(paths: &Paths) -> Result<Self, SyncError> {
        paths.ensure_dirs()?;
        Self::open_at(&paths.database)
    }

    /// Open the store backed by the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema upgrade fails.
    pub fn open_at(path: &Path) -> Result<Self, SyncError> {
        let conn = Connection::open(path).map_err(|e| {
            SyncError::Database(format!("Failed to open database {}: {e}", path.display()))
        })?;
        let store = Self::with_connection(conn)?;

        log::debug!("opened sync store at {}", path.display());
        Ok(store)
    }

    /// Open a store that lives only as long as the returned value.
    ///
    /// # Errors
    ///
    /// Returns an error if `SQLite` cannot allocate the database.
    pub fn open_in_memory() -> Result<Self, SyncError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            SyncError::Database(format!("Failed to open in-memory database: {e}"))
        })?;
        Self::with_connection(conn)
    }

    fn with_connection(mut conn: Connection) -> Result<Self, SyncError> {
        upgrade_schema(&mut conn)?;
        Ok(Self { conn })
    }

    /// List every stored key, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT key FROM kv_store ORDER BY key ASC")
            .map_err(|e| StoreError::Database(format!("Failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| StoreError::Database(format!("Failed to query keys: {e}")))?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row.map_err(|e| StoreError::Database(e.to_string()))?);
        }
        Ok(keys)
    }
}

fn schema_version(conn: &Connection) -> Result<usize, SyncError> {
    let version: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| SyncError::Database(format!("Failed to read schema version: {e}")))?;
    usize::try_from(version)
        .map_err(|_| SyncError::Database(format!("Invalid schema version {version}")))
}

/// Bring the schema up to `SCHEMA.len()`, one step per transaction.
fn upgrade_schema(conn: &mut Connection) -> Result<(), SyncError> {
    let current = schema_version(conn)?;
    if current > SCHEMA.len() {
        return Err(SyncError::Database(format!(
            "Database schema v{current} is newer than supported v{}",
            SCHEMA.len()
        )));
    }

    for (step, sql) in SCHEMA.iter().enumerate().skip(current) {
        let next = step + 1;
        let tx = conn
            .transaction()
            .map_err(|e| SyncError::Database(format!("Failed to begin upgrade: {e}")))?;
        tx.execute_batch(sql)
            .and_then(|()| tx.execute_batch(&format!("PRAGMA user_version = {next};")))
            .map_err(|e| SyncError::Database(format!("Schema upgrade to v{next} failed: {e}")))?;
        tx.commit()
            .map_err(|e| SyncError::Database(format!("Failed to commit upgrade: {e}")))?;
        log::info!("sync store schema upgraded to v{next}");
    }

    Ok(())
}

impl BackingStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let raw: Option<String> = self
            .conn
            .query_row("SELECT value FROM kv_store WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| StoreError::Database(format!("Failed to read {key}: {e}")))?;

        raw.map(|s| {
            serde_json::from_str(&s)
                .map_err(|e| StoreError::Serialization(format!("Invalid value for {key}: {e}")))
        })
        .transpose()
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let json = serde_json::to_string(value)
            .map_err(|e| StoreError::Serialization(format!("Failed to encode {key}: {e}")))?;

        self.conn
            .execute(
                r"INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
                  ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                                updated_at = excluded.updated_at",
                params![key, json, Utc::now().to_rfc3339()],
            )
            .map_err(|e| StoreError::Database(format!("Failed to write {key}: {e}")))?;

        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM kv_store WHERE key = ?1", [key])
            .map_err(|e| StoreError::Database(format!("Failed to remove {key}: {e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_set_and_get() {
        let store = create_test_store();

        store.set("novel_1", &json!({"title": "A"})).unwrap();
        assert_eq!(store.get("novel_1").unwrap(), Some(json!({"title": "A"})));
    }

    #[test]
    fn test_set_overwrites() {
        let store = create_test_store();

        store.set("novel_1", &json!({"title": "A"})).unwrap();
        store.set("novel_1", &json!({"title": "B"})).unwrap();

        assert_eq!(store.get("novel_1").unwrap(), Some(json!({"title": "B"})));
        assert_eq!(store.keys().unwrap(), vec!["novel_1".to_string()]);
    }

    #[test]
    fn test_get_missing() {
        let store = create_test_store();
        assert_eq!(store.get("missing").unwrap(), None);
    }

    #[test]
    fn test_remove() {
        let store = create_test_store();

        store.set("a", &json!(1)).unwrap();
        store.set("b", &json!(2)).unwrap();
        store.remove("a").unwrap();
        store.remove("never-existed").unwrap();

        assert_eq!(store.keys().unwrap(), vec!["b".to_string()]);
    }

    #[test]
    fn test_values_survive_reopen() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db_path = temp_dir.path().join("store.db");

        {
            let store = SqliteStore::open_at(&db_path).unwrap();
            store.set("chapter_3", &json!({"words": 1200})).unwrap();
        }

        let store = SqliteStore::open_at(&db_path).unwrap();
        assert_eq!(
            store.get("chapter_3").unwrap(),
            Some(json!({"words": 1200}))
        );
    }

    #[test]
    fn test_corrupt_value_is_serialization_error() {
        let store = create_test_store();
        store
            .conn
            .execute(
                "INSERT INTO kv_store (key, value, updated_at) VALUES ('bad', '{nope', '')",
                [],
            )
            .unwrap();

        assert!(matches!(
            store.get("bad"),
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn test_fresh_store_is_at_latest_schema() {
        let store = create_test_store();
        assert_eq!(schema_version(&store.conn).unwrap(), SCHEMA.len());
    }

    #[test]
    fn test_reopen_does_not_rerun_schema() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db_path = temp_dir.path().join("store.db");

        drop(SqliteStore::open_at(&db_path).unwrap());
        let store = SqliteStore::open_at(&db_path).unwrap();

        assert_eq!(schema_version(&store.conn).unwrap(), SCHEMA.len());
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db_path = temp_dir.path().join("future.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute_batch("PRAGMA user_version = 99;").unwrap();
        }

        assert!(matches!(
            SqliteStore::open_at(&db_path),
            Err(SyncError::Database(_))
        ));
    }

    #[test]
    fn test_open_creates_data_dir() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let paths = Paths::with_root(temp_dir.path().join("nested").join(".draftsync"));

        let store = SqliteStore::open(&paths).unwrap();
        store.set("novel_1", &json!({"title": "A"})).unwrap();

        assert!(paths.database.exists());
    }
}
