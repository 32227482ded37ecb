//! Versioned schema changes.
//!
//! This module provides ordered, all-or-nothing schema evolution with:
//! - Validated change sets of typed operations
//! - Dependency planning with a stable, declaration-order tie-break
//! - Transactional application against a [`SchemaStore`](crate::store::SchemaStore)
//! - A durable ledger of applied change sets
//! - An environment lock serializing concurrent runs
//!
//! # Operations
//!
//! | Operation | Effect | Destructive |
//! |-----------|--------|-------------|
//! | `create_entity` | New entity with its fields | no |
//! | `add_field` | New field, backfilled by default or null | no |
//! | `remove_field` | Drops a field | yes |
//! | `rename_field` | Renames a field in place | no |
//! | `alter_field` | Replaces a field's definition | no |
//!
//! # Example
//!
//! ```ignore
//! use std::sync::atomic::AtomicBool;
//! use tamigrate_core::migration::{MigrationConfig, Migrator};
//!
//! let mut migrator = Migrator::open(MigrationConfig::default())?;
//! let change_sets = migrator.load_change_sets()?;
//!
//! // Inspect what would run
//! let plan = migrator.plan(&change_sets)?;
//! println!("pending: {:?}", plan.pending_ids());
//!
//! // Apply, stopping at the first failing change set
//! let report = migrator.run(&change_sets, &AtomicBool::new(false))?;
//! assert!(report.is_success());
//! ```

pub mod changeset;
pub mod config;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod loader;
pub mod lock;
pub mod migrator;
pub mod operation;
pub mod planner;
pub mod state;

// Re-export main types

// Change sets
pub use changeset::{ChangeSet, ChangeSetRecord};
pub use operation::Operation;

// Configuration
pub use config::MigrationConfig;

// Error types
pub use error::{ErrorKind, MigrationError};

// Execution
pub use executor::OperationExecutor;
pub use migrator::{Migrator, RunReport};
pub use planner::{MigrationPlan, Planner};

// Persistence
pub use ledger::{Ledger, LedgerEntry};
pub use lock::MigrationLock;
pub use state::{ChangeSetState, ChangeSetStatus};
