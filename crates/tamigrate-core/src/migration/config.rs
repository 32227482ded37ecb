//! Migration run configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Default directory holding the environment's database.
pub const DEFAULT_DATA_PATH: &str = "./data";

/// Default directory holding change-set files.
pub const DEFAULT_MIGRATIONS_DIR: &str = "./migrations";

/// Default lock holder name.
pub const DEFAULT_LOCK_HOLDER: &str = "tamigrate";

/// Migration run configuration.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Path to the environment's database directory.
    pub data_path: PathBuf,
    /// Directory of change-set JSON files.
    pub migrations_dir: PathBuf,
    /// Time limit for applying one change set. None means unbounded.
    pub operation_timeout: Option<Duration>,
    /// Plan and fold without touching the store or ledger.
    pub dry_run: bool,
    /// Reject applied change sets whose content changed since.
    pub verify_checksums: bool,
    /// Name recorded in the migration lock.
    pub lock_holder: String,
}

impl MigrationConfig {
    /// Create a configuration with the given data path.
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            migrations_dir: PathBuf::from(DEFAULT_MIGRATIONS_DIR),
            operation_timeout: None,
            dry_run: false,
            verify_checksums: true,
            lock_holder: DEFAULT_LOCK_HOLDER.to_string(),
        }
    }

    /// Set the change-set directory.
    pub fn with_migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    /// Set the per-change-set time limit.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Enable or disable dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Skip checksum verification of applied change sets.
    pub fn without_checksum_verification(mut self) -> Self {
        self.verify_checksums = false;
        self
    }

    /// Set the lock holder name.
    pub fn with_lock_holder(mut self, holder: impl Into<String>) -> Self {
        self.lock_holder = holder.into();
        self
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_PATH)
    }
}
