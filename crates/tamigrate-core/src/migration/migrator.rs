//! Migration runs against one environment.
//!
//! A run takes the environment lock, plans against the ledger, rebuilds the
//! registry by folding the applied change sets and then applies the pending
//! ones in order, stopping at the first failure.

use super::changeset::ChangeSet;
use super::config::MigrationConfig;
use super::error::MigrationError;
use super::executor::OperationExecutor;
use super::ledger::{Ledger, LedgerEntry};
use super::loader;
use super::lock::MigrationLock;
use super::planner::{MigrationPlan, Planner};
use super::state::{ChangeSetState, ChangeSetStatus};
use crate::catalog::SchemaRegistry;
use crate::store::{SchemaStore, SledSchemaStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

/// Outcome of [`Migrator::run`].
#[derive(Debug)]
pub struct RunReport {
    /// Every known change set in plan order with its final state.
    pub states: Vec<ChangeSetState>,
    /// Ledger entries written by this run.
    pub applied: Vec<LedgerEntry>,
    /// Registry after the run.
    pub registry: SchemaRegistry,
    /// The change-set failure that stopped the run, if any.
    pub failure: Option<MigrationError>,
    /// Whether the run stopped early on cancellation.
    pub cancelled: bool,
    /// Whether the run only previewed changes.
    pub dry_run: bool,
}

impl RunReport {
    /// Check if every pending change set was handled without failure.
    pub fn is_success(&self) -> bool {
        self.failure.is_none() && !self.cancelled
    }

    /// Ids of the change sets applied by this run.
    pub fn applied_ids(&self) -> Vec<&str> {
        self.applied
            .iter()
            .map(|entry| entry.change_set_id.as_str())
            .collect()
    }

    /// States with the given status.
    pub fn with_status(&self, status: ChangeSetStatus) -> impl Iterator<Item = &ChangeSetState> {
        self.states.iter().filter(move |s| s.status == status)
    }
}

/// Drives planning and application for one environment.
pub struct Migrator<S: SchemaStore = SledSchemaStore> {
    config: MigrationConfig,
    db: sled::Db,
    ledger: Ledger,
    store: S,
    executor: OperationExecutor,
}

impl Migrator<SledSchemaStore> {
    /// Open the environment at `config.data_path`.
    pub fn open(config: MigrationConfig) -> Result<Self, MigrationError> {
        let db = sled::open(&config.data_path)?;
        info!(path = %config.data_path.display(), "opened environment");
        Self::with_db(config, db)
    }

    /// Use an already-open database for the ledger, lock and store.
    pub fn with_db(config: MigrationConfig, db: sled::Db) -> Result<Self, MigrationError> {
        let store = SledSchemaStore::open(&db)?;
        Self::with_store(config, db, store)
    }
}

impl<S: SchemaStore> Migrator<S> {
    /// Use `db` for the ledger and lock, and `store` for schema changes.
    pub fn with_store(config: MigrationConfig, db: sled::Db, store: S) -> Result<Self, MigrationError> {
        let ledger = Ledger::open(&db)?;
        let executor = OperationExecutor::new(&config);
        Ok(Self {
            config,
            db,
            ledger,
            store,
            executor,
        })
    }

    /// Run configuration.
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Environment database.
    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    /// Applied-set ledger.
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Schema store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Load the change sets in the configured directory.
    pub fn load_change_sets(&self) -> Result<Vec<ChangeSet>, MigrationError> {
        loader::load_dir(&self.config.migrations_dir)
    }

    /// Plan `change_sets` against the ledger.
    ///
    /// With checksum verification on, an applied change set whose content no
    /// longer matches its ledger entry is a validation error.
    pub fn plan<'a>(&self, change_sets: &'a [ChangeSet]) -> Result<MigrationPlan<'a>, MigrationError> {
        let applied = self.ledger.applied_ids()?;
        let plan = Planner::plan(change_sets, &applied)?;
        if self.config.verify_checksums {
            self.verify_checksums(&plan.applied)?;
        }
        Ok(plan)
    }

    /// Rebuild the registry from the applied part of `plan`.
    pub fn fold(&self, plan: &MigrationPlan<'_>) -> Result<SchemaRegistry, MigrationError> {
        let mut registry = SchemaRegistry::new();
        for cs in &plan.applied {
            registry = self.executor.preview(cs, &registry)?;
        }
        Ok(registry)
    }

    /// Report the state of every change set without applying anything.
    pub fn status(&self, change_sets: &[ChangeSet]) -> Result<Vec<ChangeSetState>, MigrationError> {
        let order = Planner::order(change_sets)?;
        let applied_at = self.applied_at()?;
        let states = order
            .into_iter()
            .map(|cs| match applied_at.get(cs.id()) {
                Some(&at) => ChangeSetState::already_applied(cs.id(), at),
                None => {
                    let mut state = ChangeSetState::new(cs.id());
                    state.plan();
                    state
                }
            })
            .collect();
        Ok(states)
    }

    /// Apply every pending change set in plan order.
    ///
    /// Planning faults and lock contention are returned as errors before
    /// anything is applied. A change-set failure stops the run and is
    /// reported in [`RunReport::failure`]; change sets applied before it stay
    /// applied. `cancel` is checked between change sets.
    pub fn run(
        &mut self,
        change_sets: &[ChangeSet],
        cancel: &AtomicBool,
    ) -> Result<RunReport, MigrationError> {
        let lock = MigrationLock::acquire(&self.db, &self.config.lock_holder)?;

        let plan = self.plan(change_sets)?;
        let mut registry = self.fold(&plan)?;

        let applied_at = self.applied_at()?;
        let mut states = Vec::with_capacity(plan.applied.len() + plan.pending.len());
        for cs in &plan.applied {
            let at = applied_at.get(cs.id()).copied().unwrap_or_default();
            states.push(ChangeSetState::already_applied(cs.id(), at));
        }
        let first_pending = states.len();
        for cs in &plan.pending {
            let mut state = ChangeSetState::new(cs.id());
            state.plan();
            states.push(state);
        }

        let dry_run = self.config.dry_run;
        info!(
            applied = plan.applied.len(),
            pending = plan.pending.len(),
            dry_run,
            timeout = ?self.executor.timeout(),
            "starting migration run"
        );

        let mut applied = Vec::new();
        let mut failure = None;
        let mut cancelled = false;
        for (i, cs) in plan.pending.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                warn!(next = %cs.id(), "run cancelled");
                cancelled = true;
                break;
            }

            // A preview never enters Applying; the set stays Planned.
            let state = &mut states[first_pending + i];
            if !dry_run {
                state.start();
            }

            let result = if dry_run {
                self.executor.preview(cs, &registry).map(|preview| {
                    registry = preview;
                    None
                })
            } else {
                self.executor
                    .apply(cs, &mut self.store, &mut registry, &self.ledger)
                    .map(Some)
            };

            match result {
                Ok(Some(entry)) => {
                    state.complete(entry.applied_at);
                    applied.push(entry);
                }
                Ok(None) => {}
                Err(e) => {
                    error!(change_set = %cs.id(), error = %e, "stopping run");
                    state.fail(e.to_string());
                    failure = Some(e);
                    break;
                }
            }
        }

        lock.release()?;

        Ok(RunReport {
            states,
            applied,
            registry,
            failure,
            cancelled,
            dry_run,
        })
    }

    fn applied_at(&self) -> Result<HashMap<String, u64>, MigrationError> {
        Ok(self
            .ledger
            .entries()?
            .into_iter()
            .map(|entry| (entry.change_set_id, entry.applied_at))
            .collect())
    }

    fn verify_checksums(&self, applied: &[&ChangeSet]) -> Result<(), MigrationError> {
        for cs in applied {
            if let Some(entry) = self.ledger.get(cs.id())? {
                if entry.checksum != cs.checksum() {
                    return Err(MigrationError::validation(
                        cs.id(),
                        format!(
                            "modified after apply (recorded checksum {}, now {})",
                            entry.checksum,
                            cs.checksum()
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}
