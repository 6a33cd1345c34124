pub mod error;
pub mod migrations;
pub mod models;
pub mod queries;

use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::info;

pub use error::StoreError;

const READER_POOL_SIZE: usize = 4;

/// How long a connection waits on a locked database before giving up with
/// a transient `Busy` error.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite store with a reader/writer split: one writer connection guarded by
/// a mutex, plus a round-robin pool of read-only connections. WAL mode lets
/// readers run alongside the writer.
pub struct Database {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    reader_idx: AtomicUsize,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open_with_timeout(path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        let writer = Connection::open(path)?;
        writer.busy_timeout(busy_timeout)?;
        writer.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        writer.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&writer)?;

        let mut readers = Vec::with_capacity(READER_POOL_SIZE);
        for _ in 0..READER_POOL_SIZE {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            conn.busy_timeout(busy_timeout)?;
            readers.push(Mutex::new(conn));
        }

        info!(
            "Database opened at {} (1 writer + {} readers)",
            path.display(),
            READER_POOL_SIZE
        );
        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            reader_idx: AtomicUsize::new(0),
        })
    }

    /// Run a read on one of the pooled read-only connections.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let idx = self.reader_idx.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let conn = self.readers[idx]
            .lock()
            .map_err(|e| StoreError::Internal(format!("Reader lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Run a single-statement write on the writer connection.
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self
            .writer
            .lock()
            .map_err(|e| StoreError::Internal(format!("Writer lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Run `f` inside an IMMEDIATE transaction on the writer. The write lock
    /// is taken up front, so check-then-write sequences cannot interleave with
    /// another writer, including one in a different process. Any error rolls
    /// the whole unit back.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, StoreError>,
    {
        let mut conn = self
            .writer
            .lock()
            .map_err(|e| StoreError::Internal(format!("Writer lock poisoned: {}", e)))?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Run several reads against one consistent WAL snapshot.
    pub fn with_snapshot<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        })
    }
}
