//! Schema store backed by a sled tree.
//!
//! Table layouts are kept as rkyv-encoded [`EntityDef`] values keyed by
//! entity name. A transaction stages whole tables in memory and commits them
//! with a single atomic batch, or together with the ledger entry in one
//! multi-tree transaction.

use super::{SchemaStore, StoreError};
use crate::catalog::{EntityDef, FieldDef};
use crate::migration::{Ledger, LedgerEntry, MigrationError};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Batch, Db, Transactional, Tree};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tracing::debug;

/// Sled-backed [`SchemaStore`].
pub struct SledSchemaStore {
    tree: Tree,
    /// Tables touched by the open transaction, if any.
    staged: Option<HashMap<String, EntityDef>>,
}

impl SledSchemaStore {
    /// Tree name for table layouts.
    pub const TREE_NAME: &'static str = "store:tables";

    /// Open or create the store in the given database.
    pub fn open(db: &Db) -> Result<Self, StoreError> {
        let tree = db.open_tree(Self::TREE_NAME)?;
        Ok(Self { tree, staged: None })
    }

    /// Committed layout of a table.
    pub fn table(&self, name: &str) -> Result<Option<EntityDef>, StoreError> {
        read_table(&self.tree, name)
    }

    /// All committed tables, in name order.
    pub fn tables(&self) -> Result<Vec<EntityDef>, StoreError> {
        let mut tables = Vec::new();
        for result in self.tree.iter() {
            let (_, value) = result?;
            tables.push(EntityDef::from_bytes(&value)?);
        }
        Ok(tables)
    }

    /// Check if a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.staged.is_some()
    }

    /// Flush committed writes to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.tree.flush()?;
        Ok(())
    }

    fn staged_table(&mut self, name: &str) -> Result<&mut EntityDef, StoreError> {
        let staged = self.staged.as_mut().ok_or(StoreError::NoTransaction)?;
        match staged.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let table = read_table(&self.tree, name)?.ok_or_else(|| {
                    StoreError::Rejected(format!("table `{name}` does not exist"))
                })?;
                Ok(entry.insert(table))
            }
        }
    }

    fn column_index(table: &EntityDef, column: &str) -> Result<usize, StoreError> {
        table.field_index(column).ok_or_else(|| {
            StoreError::Rejected(format!("column `{}.{column}` does not exist", table.name))
        })
    }
}

fn read_table(tree: &Tree, name: &str) -> Result<Option<EntityDef>, StoreError> {
    match tree.get(name.as_bytes())? {
        Some(bytes) => Ok(Some(EntityDef::from_bytes(&bytes)?)),
        None => Ok(None),
    }
}

impl SchemaStore for SledSchemaStore {
    fn begin(&mut self) -> Result<(), StoreError> {
        if self.staged.is_some() {
            return Err(StoreError::TransactionActive);
        }
        self.staged = Some(HashMap::new());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        let staged = self.staged.take().ok_or(StoreError::NoTransaction)?;
        let mut batch = Batch::default();
        for (name, table) in &staged {
            batch.insert(name.as_bytes(), table.to_bytes()?);
        }
        self.tree.apply_batch(batch)?;
        self.tree.flush()?;
        debug!(tables = staged.len(), "committed store transaction");
        Ok(())
    }

    fn commit_recorded(&mut self, ledger: &Ledger, entry: &LedgerEntry) -> Result<(), MigrationError> {
        let staged = self.staged.take().ok_or(StoreError::NoTransaction)?;
        let mut tables = Vec::with_capacity(staged.len());
        for (name, table) in &staged {
            tables.push((name.as_bytes(), table.to_bytes()?));
        }
        let key = entry.change_set_id.as_bytes();
        let value = entry.to_bytes()?;

        let result = (&self.tree, ledger.tree()).transaction(|(tables_tx, ledger_tx)| {
            if ledger_tx.get(key)?.is_some() {
                return Err(ConflictableTransactionError::Abort(()));
            }
            for (name, bytes) in &tables {
                tables_tx.insert(*name, bytes.as_slice())?;
            }
            ledger_tx.insert(key, value.as_slice())?;
            Ok(())
        });
        match result {
            Ok(()) => {}
            Err(TransactionError::Abort(())) => {
                return Err(MigrationError::Duplicate {
                    change_set: entry.change_set_id.clone(),
                })
            }
            Err(TransactionError::Storage(e)) => return Err(StoreError::from(e).into()),
        }

        self.tree.flush()?;
        debug!(
            tables = staged.len(),
            change_set = %entry.change_set_id,
            "committed store transaction with ledger entry"
        );
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        let staged = self.staged.take().ok_or(StoreError::NoTransaction)?;
        debug!(tables = staged.len(), "rolled back store transaction");
        Ok(())
    }

    fn create_entity(&mut self, entity: &EntityDef) -> Result<(), StoreError> {
        let staged = self.staged.as_mut().ok_or(StoreError::NoTransaction)?;
        if staged.contains_key(&entity.name) || self.tree.contains_key(entity.name.as_bytes())? {
            return Err(StoreError::Rejected(format!(
                "table `{}` already exists",
                entity.name
            )));
        }
        staged.insert(entity.name.clone(), entity.clone());
        Ok(())
    }

    fn add_field(&mut self, entity: &str, field: &FieldDef) -> Result<(), StoreError> {
        let table = self.staged_table(entity)?;
        if table.has_field(&field.name) {
            return Err(StoreError::Rejected(format!(
                "column `{entity}.{}` already exists",
                field.name
            )));
        }
        table.fields.push(field.clone());
        Ok(())
    }

    fn remove_field(&mut self, entity: &str, name: &str) -> Result<(), StoreError> {
        let table = self.staged_table(entity)?;
        let index = Self::column_index(table, name)?;
        table.fields.remove(index);
        Ok(())
    }

    fn rename_field(
        &mut self,
        entity: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<(), StoreError> {
        let table = self.staged_table(entity)?;
        let index = Self::column_index(table, old_name)?;
        if table.has_field(new_name) {
            return Err(StoreError::Rejected(format!(
                "column `{entity}.{new_name}` already exists"
            )));
        }
        table.fields[index].name = new_name.to_string();
        for group in &mut table.unique_together {
            for column in group.iter_mut().filter(|c| c.as_str() == old_name) {
                *column = new_name.to_string();
            }
        }
        Ok(())
    }

    fn alter_field(&mut self, entity: &str, name: &str, field: &FieldDef) -> Result<(), StoreError> {
        let table = self.staged_table(entity)?;
        let index = Self::column_index(table, name)?;
        table.fields[index] = field.clone();
        Ok(())
    }
}
