//! Meridian Store -- rusqlite backend for the dynamics key-value gateway.
//!
//! One table of opaque key/value blobs. WAL mode + busy_timeout so an
//! operator CLI can read while the node holds the database open.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use meridian_dynamics::{DynamicsError, KeyValueStore};

const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch { expected: u32, found: u32 },
    #[error("lock poisoned")]
    LockPoisoned,
}

impl From<StoreError> for DynamicsError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LockPoisoned => DynamicsError::LockPoisoned,
            other => DynamicsError::backend(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    fn db(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Open (or create) the database at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path: db_path.to_path_buf(),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Private in-memory database (for tests and throwaway nodes).
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            db_path: PathBuf::from(":memory:"),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.db()?;
        let table_exists: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |row| row.get(0),
        )?;

        if !table_exists {
            conn.execute_batch(include_str!("schema.sql"))?;
            tracing::info!(path = %self.db_path.display(), "store: created schema v{SCHEMA_VERSION}");
        }

        let version: u32 = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?
            .unwrap_or(0);

        if version != SCHEMA_VERSION {
            return Err(StoreError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION,
                found: version,
            });
        }
        Ok(())
    }

    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let conn = self.db()?;
        let value = conn
            .query_row(
                "SELECT value FROM dynamics_kv WHERE key = ?1",
                params![key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn write(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let conn = self.db()?;
        conn.execute(
            "INSERT INTO dynamics_kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<bool> {
        let conn = self.db()?;
        let changes = conn.execute("DELETE FROM dynamics_kv WHERE key = ?1", params![key])?;
        Ok(changes > 0)
    }

    /// All entries land in one transaction; on any failure none do.
    fn write_all(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<()> {
        let mut conn = self.db()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO dynamics_kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )?;
            for (key, value) in entries {
                stmt.execute(params![key, value])?;
            }
        }
        tx.commit()?;
        tracing::debug!(records = entries.len(), "store: committed batch");
        Ok(())
    }

    /// Number of stored records.
    pub fn record_count(&self) -> Result<u64> {
        let conn = self.db()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM dynamics_kv", [], |row| row.get(0))?;
        u64::try_from(count)
            .map_err(|_| StoreError::Sqlite(rusqlite::Error::IntegralValueOutOfRange(0, count)))
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &[u8]) -> meridian_dynamics::Result<Option<Vec<u8>>> {
        Ok(self.read(key)?)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> meridian_dynamics::Result<()> {
        Ok(self.write(key, value)?)
    }

    fn delete(&self, key: &[u8]) -> meridian_dynamics::Result<bool> {
        Ok(self.remove(key)?)
    }

    fn write_batch(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> meridian_dynamics::Result<()> {
        Ok(self.write_all(entries)?)
    }
}
