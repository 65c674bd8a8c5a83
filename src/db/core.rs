use std::sync::{Arc, Mutex};

use anyhow::Result;
use include_dir::{include_dir, Dir};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use rusqlite_migration::Migrations;

use crate::config::HistoryConfig;

static MIGRATIONS_DIR: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/migrations");

/// SQLite-backed history store. Holds the `history_record` and
/// `history_attribute` tables; both are append-only.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
    batch_size: usize,
}

impl Db {
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    pub fn open<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        Self::from_connection(conn)
    }

    /// Limits how many ids are bound into one `IN (...)` query.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Applies the store-related settings of `config`.
    pub fn configure(self, config: &HistoryConfig) -> Self {
        self.with_batch_size(config.query_batch_size)
    }

    pub(crate) fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Calls the supplied closure with a transaction that can be used to
    /// write. Commits if the closure returns Ok, otherwise rolls back.
    pub fn transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction) -> Result<R>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Failed to acquire connection lock"))?;
        let txn = conn.transaction()?;
        let result = f(&txn)?;
        txn.commit()?;
        Ok(result)
    }

    /// Like `transaction`, but the transaction is always rolled back. All
    /// history reads go through here.
    pub fn read<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction) -> Result<R>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Failed to acquire connection lock"))?;
        let txn = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let result = f(&txn)?;
        txn.rollback()?;
        Ok(result)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let migrations = Migrations::from_directory(&MIGRATIONS_DIR)?;
        migrations.to_latest(&mut conn)?;
        log::debug!("history schema migrated to latest");

        Ok(Db {
            conn: Arc::new(Mutex::new(conn)),
            batch_size: 500,
        })
    }
}
