//! Store capability driven by the executor.
//!
//! The executor is the only caller of the schema-mutation methods. A store
//! applies changes inside an explicit transaction: nothing is visible until
//! `commit`, and `rollback` discards everything since `begin`.

mod sled_store;

pub use sled_store::SledSchemaStore;

use crate::catalog::{EntityDef, FieldDef};
use crate::migration::{Ledger, LedgerEntry, MigrationError};
use std::time::Duration;
use thiserror::Error;

/// Store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A mutation or commit was attempted outside a transaction.
    #[error("no active transaction")]
    NoTransaction,

    /// `begin` was called while a transaction is open.
    #[error("a transaction is already active")]
    TransactionActive,

    /// The store refused the change.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The change set exceeded its time limit.
    #[error("timed out after {elapsed:?} (limit {limit:?})")]
    Timeout {
        /// Time spent so far.
        elapsed: Duration,
        /// Configured limit.
        limit: Duration,
    },

    /// Native backend failure.
    #[error(transparent)]
    Backend(#[from] crate::error::Error),
}

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        StoreError::Backend(e.into())
    }
}

/// Narrow schema-mutation interface of a persistence engine.
pub trait SchemaStore {
    /// Open a transaction.
    fn begin(&mut self) -> Result<(), StoreError>;

    /// Make every change since `begin` durable.
    fn commit(&mut self) -> Result<(), StoreError>;

    /// Discard every change since `begin`.
    fn rollback(&mut self) -> Result<(), StoreError>;

    /// Commit and record `entry` in `ledger`.
    ///
    /// The default commits first and records second, so a crash between the
    /// two leaves the store ahead of the ledger. Stores sharing the ledger's
    /// database override this to write both in one atomic step.
    fn commit_recorded(&mut self, ledger: &Ledger, entry: &LedgerEntry) -> Result<(), MigrationError> {
        self.commit()?;
        ledger.record(entry)
    }

    /// Create a table for `entity`.
    fn create_entity(&mut self, entity: &EntityDef) -> Result<(), StoreError>;

    /// Add a column.
    fn add_field(&mut self, entity: &str, field: &FieldDef) -> Result<(), StoreError>;

    /// Drop a column.
    fn remove_field(&mut self, entity: &str, name: &str) -> Result<(), StoreError>;

    /// Rename a column.
    fn rename_field(&mut self, entity: &str, old_name: &str, new_name: &str)
        -> Result<(), StoreError>;

    /// Change a column's definition.
    fn alter_field(&mut self, entity: &str, name: &str, field: &FieldDef)
        -> Result<(), StoreError>;
}

/// Get the current timestamp in microseconds since Unix epoch.
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}
