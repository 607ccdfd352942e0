//! Persistence boundary for Marquee POS.
//!
//! The reconciliation engine itself never touches storage; it is handed
//! orders as values and emits plain data. This module defines the two
//! collaborator traits the lifecycle manager depends on ([`KvStore`] for
//! snapshots and state markers, [`OrderLog`] for the append-only order
//! log) plus a SQLite-backed implementation and in-memory doubles for
//! tests.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

use crate::calendar::business_date_of;
use crate::order::Order;

/// Errors crossing the persistence boundary.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store lock poisoned")]
    LockPoisoned,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Fallible async key/value storage for report snapshots and lifecycle
/// state markers.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// The append-only order log. Orders are never mutated once appended;
/// the only delete path is retention pruning by business date.
#[async_trait]
pub trait OrderLog: Send + Sync {
    /// All orders in insertion order.
    async fn load_all(&self) -> Result<Vec<Order>, StoreError>;
    async fn append(&self, order: &Order) -> Result<(), StoreError>;
    /// Delete orders whose business date is strictly older than `cutoff`.
    /// Returns the number of orders removed.
    async fn delete_older_than(&self, cutoff: &str) -> Result<usize, StoreError>;
}

// ---------------------------------------------------------------------------
// SQLite backend
// ---------------------------------------------------------------------------

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 1;

/// SQLite-backed [`KvStore`] and [`OrderLog`] sharing one connection.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteBackend {
    /// Open (or create) the database at `{data_dir}/marquee.db`.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("marquee.db");
        info!("opening database at {}", db_path.display());

        let conn = open_and_configure(&db_path)?;
        run_migrations(&conn)?;
        info!("database initialized (schema v{CURRENT_SCHEMA_VERSION})");

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

fn open_and_configure(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(conn)
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    info!("migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

/// Migration v1: kv_store for snapshots/markers, order_log for orders.
fn migrate_v1(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS kv_store (
            key TEXT PRIMARY KEY,
            value BLOB NOT NULL,
            updated_at TEXT DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS order_log (
            id TEXT PRIMARY KEY,
            business_date TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_order_log_business_date
            ON order_log(business_date);

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )?;
    Ok(())
}

#[async_trait]
impl KvStore for SqliteBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let conn = self.lock()?;
        let value = conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO kv_store (key, value, updated_at)
             VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
        Ok(())
    }
}

#[async_trait]
impl OrderLog for SqliteBackend {
    async fn load_all(&self) -> Result<Vec<Order>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT payload FROM order_log ORDER BY rowid ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut orders = Vec::new();
        for payload in rows.flatten() {
            match serde_json::from_str::<Order>(&payload) {
                Ok(order) => orders.push(order),
                // A corrupt row must not take the whole log down.
                Err(e) => warn!(error = %e, "order_log: skipping unparsable row"),
            }
        }
        Ok(orders)
    }

    async fn append(&self, order: &Order) -> Result<(), StoreError> {
        let payload = serde_json::to_string(order)?;
        let business_date = business_date_of(order.timestamp);
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO order_log (id, business_date, payload)
             VALUES (?1, ?2, ?3)",
            params![order.id, business_date, payload],
        )?;
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: &str) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM order_log WHERE business_date < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    }
}

// ---------------------------------------------------------------------------
// In-memory doubles
// ---------------------------------------------------------------------------

/// Hash-map [`KvStore`], for tests and ephemeral setups.
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let map = self.map.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(map.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut map = self.map.lock().map_err(|_| StoreError::LockPoisoned)?;
        map.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut map = self.map.lock().map_err(|_| StoreError::LockPoisoned)?;
        map.remove(key);
        Ok(())
    }
}

/// Vec-backed [`OrderLog`], for tests and ephemeral setups.
#[derive(Default)]
pub struct MemoryOrderLog {
    orders: Mutex<Vec<Order>>,
}

impl MemoryOrderLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_orders(orders: Vec<Order>) -> Self {
        Self {
            orders: Mutex::new(orders),
        }
    }
}

#[async_trait]
impl OrderLog for MemoryOrderLog {
    async fn load_all(&self) -> Result<Vec<Order>, StoreError> {
        let orders = self.orders.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(orders.clone())
    }

    async fn append(&self, order: &Order) -> Result<(), StoreError> {
        let mut orders = self.orders.lock().map_err(|_| StoreError::LockPoisoned)?;
        orders.push(order.clone());
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: &str) -> Result<usize, StoreError> {
        let mut orders = self.orders.lock().map_err(|_| StoreError::LockPoisoned)?;
        let before = orders.len();
        orders.retain(|o| business_date_of(o.timestamp).as_str() >= cutoff);
        Ok(before - orders.len())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
