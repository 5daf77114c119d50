//! Database connection management.

use crate::migrations::MigrationManager;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::Arc;

/// Shared handle to the ledger database.
///
/// Cloning is cheap; all clones serialize on the same underlying connection.
#[derive(Debug, Clone)]
pub struct Database {
    connection: Arc<std::sync::Mutex<Connection>>,
}

impl Database {
    /// Open the ledger at the specified path, creating and migrating it if
    /// needed.
    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let conn = Connection::open(path)?;
        Self::configure(&conn)?;
        MigrationManager::migrate(&conn)?;
        Ok(Self {
            connection: Arc::new(std::sync::Mutex::new(conn)),
        })
    }

    /// Open an in-memory ledger for testing.
    pub fn open_in_memory() -> crate::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        MigrationManager::migrate(&conn)?;
        Ok(Self {
            connection: Arc::new(std::sync::Mutex::new(conn)),
        })
    }

    fn configure(conn: &Connection) -> crate::Result<()> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(30))?;
        Ok(())
    }

    /// Execute a transaction with automatic rollback on error.
    pub fn transaction<F, T>(&self, f: F) -> crate::Result<T>
    where
        F: FnOnce(&Connection) -> crate::Result<T>,
    {
        self.run_transaction(TransactionBehavior::Deferred, f)
    }

    /// Execute a transaction that takes the write lock up front.
    ///
    /// Used for read-modify-write sequences such as the queue pop, where two
    /// concurrent callers must not both observe the pre-update state.
    pub fn immediate_transaction<F, T>(&self, f: F) -> crate::Result<T>
    where
        F: FnOnce(&Connection) -> crate::Result<T>,
    {
        self.run_transaction(TransactionBehavior::Immediate, f)
    }

    fn run_transaction<F, T>(&self, behavior: TransactionBehavior, f: F) -> crate::Result<T>
    where
        F: FnOnce(&Connection) -> crate::Result<T>,
    {
        let conn = self
            .connection
            .lock()
            .map_err(|e| crate::Error::generic(format!("Failed to acquire database lock: {}", e)))?;

        let tx = Transaction::new_unchecked(&conn, behavior)?;
        match f(&tx) {
            Ok(result) => {
                tx.commit()?;
                Ok(result)
            }
            Err(e) => {
                tx.rollback()?;
                Err(e)
            }
        }
    }

    /// Run a read-only closure against the connection.
    pub fn read<F, T>(&self, f: F) -> crate::Result<T>
    where
        F: FnOnce(&Connection) -> crate::Result<T>,
    {
        let conn = self
            .connection
            .lock()
            .map_err(|e| crate::Error::generic(format!("Failed to acquire database lock: {}", e)))?;
        f(&conn)
    }
}
