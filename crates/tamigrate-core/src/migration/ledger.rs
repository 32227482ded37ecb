//! Applied-set ledger.
//!
//! The durable record of which change sets have been applied. Recording is a
//! compare-and-swap on the change set id, so an id can be recorded at most
//! once.

use super::error::MigrationError;
use crate::store::current_timestamp;
use rkyv::{Archive, Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// One applied change set.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize, serde::Serialize)]
pub struct LedgerEntry {
    /// Change set identifier.
    pub change_set_id: String,
    /// When it was applied (microseconds since epoch).
    pub applied_at: u64,
    /// Checksum of the change set at apply time.
    pub checksum: String,
}

impl LedgerEntry {
    /// Create an entry stamped with the current time.
    pub fn new(change_set_id: impl Into<String>, checksum: impl Into<String>) -> Self {
        Self::at(change_set_id, checksum, current_timestamp())
    }

    /// Create an entry with an explicit timestamp.
    pub fn at(change_set_id: impl Into<String>, checksum: impl Into<String>, applied_at: u64) -> Self {
        Self {
            change_set_id: change_set_id.into(),
            applied_at,
            checksum: checksum.into(),
        }
    }

    /// Serialize the entry to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MigrationError> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| MigrationError::Serialization(e.to_string()))
    }

    /// Deserialize an entry from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MigrationError> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| MigrationError::Storage(crate::error::Error::Deserialization(e.to_string())))
    }
}

/// Durable ledger of applied change sets.
pub struct Ledger {
    tree: sled::Tree,
}

impl Ledger {
    /// Tree name for the ledger.
    pub const TREE_NAME: &'static str = "migration:ledger";

    /// Open or create the ledger.
    pub fn open(db: &sled::Db) -> Result<Self, MigrationError> {
        let tree = db.open_tree(Self::TREE_NAME)?;
        Ok(Self { tree })
    }

    pub(crate) fn tree(&self) -> &sled::Tree {
        &self.tree
    }

    /// Check if a change set has been applied.
    pub fn has(&self, change_set_id: &str) -> Result<bool, MigrationError> {
        Ok(self.tree.contains_key(change_set_id.as_bytes())?)
    }

    /// Record a change set as applied.
    ///
    /// Fails with [`MigrationError::Duplicate`] if it is already recorded.
    pub fn record(&self, entry: &LedgerEntry) -> Result<(), MigrationError> {
        let value = entry.to_bytes()?;
        let swapped = self.tree.compare_and_swap(
            entry.change_set_id.as_bytes(),
            None as Option<&[u8]>,
            Some(value),
        )?;
        if swapped.is_err() {
            return Err(MigrationError::Duplicate {
                change_set: entry.change_set_id.clone(),
            });
        }
        self.tree.flush()?;
        debug!(change_set = %entry.change_set_id, "recorded in ledger");
        Ok(())
    }

    /// Look up an entry.
    pub fn get(&self, change_set_id: &str) -> Result<Option<LedgerEntry>, MigrationError> {
        match self.tree.get(change_set_id.as_bytes())? {
            Some(bytes) => Ok(Some(LedgerEntry::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> Result<Vec<LedgerEntry>, MigrationError> {
        let mut entries = Vec::new();
        for result in self.tree.iter() {
            let (_, value) = result?;
            entries.push(LedgerEntry::from_bytes(&value)?);
        }
        entries.sort_by(|a, b| {
            a.applied_at
                .cmp(&b.applied_at)
                .then_with(|| a.change_set_id.cmp(&b.change_set_id))
        });
        Ok(entries)
    }

    /// Ids of every applied change set.
    pub fn applied_ids(&self) -> Result<BTreeSet<String>, MigrationError> {
        let mut ids = BTreeSet::new();
        for key in self.tree.iter().keys() {
            let key = key?;
            ids.insert(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(ids)
    }

    /// Number of applied change sets.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Check if nothing has been applied.
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Flush changes to disk.
    pub fn flush(&self) -> Result<(), MigrationError> {
        self.tree.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> sled::Db {
        sled::Config::new().temporary(true).open().unwrap()
    }

    #[test]
    fn test_record_and_has() {
        let db = test_db();
        let ledger = Ledger::open(&db).unwrap();

        assert!(!ledger.has("0001_initial").unwrap());
        ledger
            .record(&LedgerEntry::new("0001_initial", "abc"))
            .unwrap();
        assert!(ledger.has("0001_initial").unwrap());
        assert_eq!(ledger.len(), 1);

        let entry = ledger.get("0001_initial").unwrap().unwrap();
        assert_eq!(entry.checksum, "abc");
        assert!(entry.applied_at > 0);
    }

    #[test]
    fn test_record_is_at_most_once() {
        let db = test_db();
        let ledger = Ledger::open(&db).unwrap();

        ledger.record(&LedgerEntry::at("0001", "a", 1)).unwrap();
        let err = ledger.record(&LedgerEntry::at("0001", "b", 2)).unwrap_err();

        assert!(matches!(err, MigrationError::Duplicate { .. }));
        assert_eq!(ledger.get("0001").unwrap().unwrap().checksum, "a");
    }

    #[test]
    fn test_entries_ordered_by_time() {
        let db = test_db();
        let ledger = Ledger::open(&db).unwrap();

        ledger.record(&LedgerEntry::at("b", "x", 20)).unwrap();
        ledger.record(&LedgerEntry::at("a", "x", 30)).unwrap();
        ledger.record(&LedgerEntry::at("c", "x", 10)).unwrap();

        let ids: Vec<String> = ledger
            .entries()
            .unwrap()
            .into_iter()
            .map(|e| e.change_set_id)
            .collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
        assert_eq!(ledger.applied_ids().unwrap().len(), 3);
    }

    #[test]
    fn test_durable_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = sled::Config::new().path(dir.path());

        {
            let db = config.clone().open().unwrap();
            let ledger = Ledger::open(&db).unwrap();
            ledger.record(&LedgerEntry::new("0001", "x")).unwrap();
        }

        {
            let db = config.open().unwrap();
            let ledger = Ledger::open(&db).unwrap();
            assert!(ledger.has("0001").unwrap());
        }
    }
}
