//! Advisory migration lock.
//!
//! Serializes runs against one environment. The lock lives in the
//! environment's own database so it is visible to every process that opens
//! it, and is released when the guard drops.

use super::error::MigrationError;
use crate::store::current_timestamp;
use tracing::{info, warn};

const LOCK_KEY: &[u8] = b"holder";

/// Held migration lock; released on drop.
pub struct MigrationLock {
    tree: sled::Tree,
    token: String,
    released: bool,
}

impl MigrationLock {
    /// Tree name for the lock.
    pub const TREE_NAME: &'static str = "migration:lock";

    /// Acquire the lock, failing with [`MigrationError::Locked`] if held.
    pub fn acquire(db: &sled::Db, holder: &str) -> Result<Self, MigrationError> {
        let tree = db.open_tree(Self::TREE_NAME)?;
        let token = format!("{holder}:{}:{}", std::process::id(), current_timestamp());

        let swapped =
            tree.compare_and_swap(LOCK_KEY, None as Option<&[u8]>, Some(token.as_bytes()))?;
        if let Err(current) = swapped {
            let holder = current
                .current
                .map(|v| String::from_utf8_lossy(&v).into_owned())
                .unwrap_or_default();
            return Err(MigrationError::Locked { holder });
        }
        tree.flush()?;

        info!(token = %token, "acquired migration lock");
        Ok(Self {
            tree,
            token,
            released: false,
        })
    }

    /// Current holder token, if the lock is held.
    pub fn holder(db: &sled::Db) -> Result<Option<String>, MigrationError> {
        let tree = db.open_tree(Self::TREE_NAME)?;
        Ok(tree
            .get(LOCK_KEY)?
            .map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    /// Clear a lock left behind by a crashed run.
    pub fn force_release(db: &sled::Db) -> Result<Option<String>, MigrationError> {
        let tree = db.open_tree(Self::TREE_NAME)?;
        let previous = tree
            .remove(LOCK_KEY)?
            .map(|v| String::from_utf8_lossy(&v).into_owned());
        tree.flush()?;
        if let Some(holder) = &previous {
            warn!(holder = %holder, "force-released migration lock");
        }
        Ok(previous)
    }

    /// This guard's token.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Release the lock.
    pub fn release(mut self) -> Result<(), MigrationError> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<(), MigrationError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let swapped = self.tree.compare_and_swap(
            LOCK_KEY,
            Some(self.token.as_bytes()),
            None as Option<&[u8]>,
        )?;
        if swapped.is_err() {
            warn!(token = %self.token, "migration lock was taken over before release");
        }
        self.tree.flush()?;
        Ok(())
    }
}

impl Drop for MigrationLock {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            warn!(error = %e, "failed to release migration lock");
        }
    }
}
