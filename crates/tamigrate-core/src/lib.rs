//! tamigrate core - versioned schema change engine.
//!
//! Folds ordered change sets into a schema registry, plans which change sets
//! still need to run against an environment, and applies them all-or-nothing
//! against a store while recording every success in a durable ledger.

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod catalog;
pub mod error;
pub mod migration;
pub mod store;

pub use catalog::{
    Choice, DefaultValue, DeleteBehavior, EntityDef, FieldDef, FieldType, RelationDef,
    SchemaRegistry,
};
pub use error::Error;
pub use migration::{
    ChangeSet, ChangeSetRecord, ChangeSetState, ChangeSetStatus, ErrorKind, Ledger, LedgerEntry,
    MigrationConfig, MigrationError, MigrationLock, MigrationPlan, Migrator, Operation,
    OperationExecutor, Planner, RunReport,
};
pub use store::{SchemaStore, SledSchemaStore, StoreError};
