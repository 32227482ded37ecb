//! Operation executor.
//!
//! Applies one change set all-or-nothing: every operation goes to a working
//! copy of the registry and then to the store inside a single store
//! transaction. The ledger entry is written by the store's commit, atomically
//! with the schema changes when the store supports it.

use super::changeset::ChangeSet;
use super::config::MigrationConfig;
use super::error::MigrationError;
use super::ledger::{Ledger, LedgerEntry};
use super::operation::Operation;
use crate::catalog::SchemaRegistry;
use crate::store::{SchemaStore, StoreError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Applies change sets to a store.
#[derive(Debug, Clone, Default)]
pub struct OperationExecutor {
    timeout: Option<Duration>,
}

impl OperationExecutor {
    /// Create an executor from the run configuration.
    pub fn new(config: &MigrationConfig) -> Self {
        Self {
            timeout: config.operation_timeout,
        }
    }

    /// Create an executor with an explicit per-change-set time limit.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    /// Configured time limit.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Apply a change set.
    ///
    /// On success the store has committed, the ledger holds the returned
    /// entry and `registry` reflects the change set. On failure none of the
    /// three has changed.
    pub fn apply(
        &self,
        change_set: &ChangeSet,
        store: &mut dyn SchemaStore,
        registry: &mut SchemaRegistry,
        ledger: &Ledger,
    ) -> Result<LedgerEntry, MigrationError> {
        let id = change_set.id();
        if ledger.has(id)? {
            return Err(MigrationError::Duplicate {
                change_set: id.to_string(),
            });
        }
        for dep in change_set.dependencies() {
            if !ledger.has(dep)? {
                return Err(MigrationError::UnappliedDependency {
                    change_set: id.to_string(),
                    dependency: dep.clone(),
                });
            }
        }

        store.begin().map_err(|e| failed(id, None, e.into()))?;

        let started = Instant::now();
        let mut working = registry.clone();
        if let Err((index, cause)) = self.apply_operations(change_set, store, &mut working, started)
        {
            let failure = failed(id, Some(index), cause);
            error!(change_set = %id, operation = index, error = %failure, "change set failed");
            return Err(roll_back(id, store, failure));
        }

        let entry = LedgerEntry::new(id, change_set.checksum());
        if let Err(e) = store.commit_recorded(ledger, &entry) {
            let failure = failed(id, None, e);
            error!(change_set = %id, error = %failure, "commit failed");
            // A store that consumed its transaction reports NoTransaction here.
            if let Err(e) = store.rollback() {
                debug!(change_set = %id, error = %e, "nothing left to roll back after commit failure");
            }
            return Err(failure);
        }
        *registry = working;

        info!(
            change_set = %id,
            operations = change_set.operations().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "applied change set"
        );
        Ok(entry)
    }

    /// Fold a change set onto a copy of `registry` without touching any store.
    pub fn preview(
        &self,
        change_set: &ChangeSet,
        registry: &SchemaRegistry,
    ) -> Result<SchemaRegistry, MigrationError> {
        let mut working = registry.clone();
        for (index, op) in change_set.operations().iter().enumerate() {
            working
                .apply_operation(op)
                .map_err(|e| failed(change_set.id(), Some(index), e))?;
        }
        Ok(working)
    }

    fn apply_operations(
        &self,
        change_set: &ChangeSet,
        store: &mut dyn SchemaStore,
        working: &mut SchemaRegistry,
        started: Instant,
    ) -> Result<(), (usize, MigrationError)> {
        for (index, op) in change_set.operations().iter().enumerate() {
            debug!(change_set = %change_set.id(), index, operation = %op, "applying operation");
            if op.is_destructive() {
                warn!(change_set = %change_set.id(), index, operation = %op, "operation discards stored data");
            }
            working.apply_operation(op).map_err(|e| (index, e))?;
            apply_to_store(op, store, working).map_err(|e| (index, e))?;

            if let Some(limit) = self.timeout {
                let elapsed = started.elapsed();
                if elapsed > limit {
                    return Err((index, StoreError::Timeout { elapsed, limit }.into()));
                }
            }
        }
        Ok(())
    }
}

fn apply_to_store(
    op: &Operation,
    store: &mut dyn SchemaStore,
    working: &SchemaRegistry,
) -> Result<(), MigrationError> {
    match op {
        // The folded definition already carries unique_together and validated fields.
        Operation::CreateEntity { name, .. } => {
            store.create_entity(working.current_definition(name)?)?
        }
        Operation::AddField { entity, field } => store.add_field(entity, field)?,
        Operation::RemoveField { entity, name } => store.remove_field(entity, name)?,
        Operation::RenameField {
            entity,
            old_name,
            new_name,
        } => store.rename_field(entity, old_name, new_name)?,
        Operation::AlterField {
            entity,
            name,
            field,
        } => store.alter_field(entity, name, field)?,
    }
    Ok(())
}

fn failed(change_set: &str, operation_index: Option<usize>, source: MigrationError) -> MigrationError {
    MigrationError::ChangeSetFailed {
        change_set: change_set.to_string(),
        operation_index,
        source: Box::new(source),
    }
}

fn roll_back(change_set: &str, store: &mut dyn SchemaStore, failure: MigrationError) -> MigrationError {
    match store.rollback() {
        Ok(()) => {
            warn!(change_set = %change_set, "rolled back change set");
            failure
        }
        Err(e) => MigrationError::RollbackFailed {
            change_set: change_set.to_string(),
            reason: e.to_string(),
            cause: Box::new(failure),
        },
    }
}
