//! Migration-specific error types.

use crate::store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Broad category of a [`MigrationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed change set, caught at load or construction time.
    Validation,
    /// Operation violates current schema invariants.
    Schema,
    /// Reference to an unknown entity or field.
    NotFound,
    /// Dependency graph contains a cycle.
    Cycle,
    /// Declared or required predecessor is missing.
    MissingDependency,
    /// Ledger already holds the change set.
    Duplicate,
    /// Underlying persistence failure.
    Store,
    /// Another run holds the migration lock.
    Locked,
    /// A change-set file could not be read or parsed.
    Load,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Schema => "schema",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Cycle => "cycle",
            ErrorKind::MissingDependency => "missing_dependency",
            ErrorKind::Duplicate => "duplicate",
            ErrorKind::Store => "store",
            ErrorKind::Locked => "locked",
            ErrorKind::Load => "load",
        };
        f.write_str(name)
    }
}

/// Migration errors.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Change set is malformed or internally inconsistent.
    #[error("invalid change set {change_set}: {message}")]
    Validation {
        /// The offending change set.
        change_set: String,
        /// What is wrong with it.
        message: String,
    },

    /// Operation would break a schema invariant.
    #[error("schema error: {message}")]
    Schema {
        /// Description of the violation.
        message: String,
    },

    /// Entity or field does not exist.
    #[error("{kind} `{name}` not found")]
    NotFound {
        /// `"entity"` or `"field"`.
        kind: &'static str,
        /// Qualified name of the missing item.
        name: String,
    },

    /// Dependency graph contains a cycle.
    #[error("dependency cycle among change sets: {}", .ids.join(", "))]
    Cycle {
        /// Change sets that could not be ordered, in declaration order.
        ids: Vec<String>,
    },

    /// A declared dependency does not name any known change set.
    #[error("change set {change_set} depends on unknown change set {dependency}")]
    MissingDependency {
        /// The declaring change set.
        change_set: String,
        /// The unknown predecessor.
        dependency: String,
    },

    /// A predecessor exists but has not been applied yet.
    #[error("change set {change_set} requires {dependency} to be applied first")]
    UnappliedDependency {
        /// The change set being applied.
        change_set: String,
        /// The predecessor missing from the ledger.
        dependency: String,
    },

    /// Change set is already recorded in the ledger.
    #[error("change set {change_set} is already applied")]
    Duplicate {
        /// The change set.
        change_set: String,
    },

    /// Store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A change set failed and was rolled back.
    #[error("change set {change_set} failed{}: {source}", at_operation(.operation_index))]
    ChangeSetFailed {
        /// The change set.
        change_set: String,
        /// Index of the failing operation, if the failure was tied to one.
        operation_index: Option<usize>,
        /// Underlying failure.
        #[source]
        source: Box<MigrationError>,
    },

    /// A failed change set could not be rolled back.
    #[error("rollback of change set {change_set} failed: {reason} (after: {cause})")]
    RollbackFailed {
        /// The change set.
        change_set: String,
        /// Why rollback failed.
        reason: String,
        /// The failure that triggered the rollback.
        cause: Box<MigrationError>,
    },

    /// Another run holds the migration lock.
    #[error("migration lock is held by {holder}")]
    Locked {
        /// Token of the current holder.
        holder: String,
    },

    /// A change-set file could not be loaded.
    #[error("failed to load {}: {message}", .path.display())]
    Load {
        /// File or directory being read.
        path: PathBuf,
        /// Reason.
        message: String,
    },

    /// Storage error.
    #[error(transparent)]
    Storage(#[from] crate::error::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

fn at_operation(index: &Option<usize>) -> String {
    match index {
        Some(index) => format!(" at operation {index}"),
        None => String::new(),
    }
}

impl From<sled::Error> for MigrationError {
    fn from(e: sled::Error) -> Self {
        MigrationError::Storage(e.into())
    }
}

impl MigrationError {
    /// Build a validation error.
    pub fn validation(change_set: impl Into<String>, message: impl Into<String>) -> Self {
        MigrationError::Validation {
            change_set: change_set.into(),
            message: message.into(),
        }
    }

    /// Build a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        MigrationError::Schema {
            message: message.into(),
        }
    }

    /// Build a not-found error for an entity.
    pub fn entity_not_found(entity: &str) -> Self {
        MigrationError::NotFound {
            kind: "entity",
            name: entity.to_string(),
        }
    }

    /// Build a not-found error for a field.
    pub fn field_not_found(entity: &str, field: &str) -> Self {
        MigrationError::NotFound {
            kind: "field",
            name: format!("{entity}.{field}"),
        }
    }

    /// The category of this error, looking through change-set context.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MigrationError::Validation { .. } => ErrorKind::Validation,
            MigrationError::Schema { .. } => ErrorKind::Schema,
            MigrationError::NotFound { .. } => ErrorKind::NotFound,
            MigrationError::Cycle { .. } => ErrorKind::Cycle,
            MigrationError::MissingDependency { .. }
            | MigrationError::UnappliedDependency { .. } => ErrorKind::MissingDependency,
            MigrationError::Duplicate { .. } => ErrorKind::Duplicate,
            MigrationError::ChangeSetFailed { source, .. } => source.kind(),
            MigrationError::RollbackFailed { .. }
            | MigrationError::Store(_)
            | MigrationError::Storage(_)
            | MigrationError::Serialization(_) => ErrorKind::Store,
            MigrationError::Locked { .. } => ErrorKind::Locked,
            MigrationError::Load { .. } => ErrorKind::Load,
        }
    }

    /// Check if this error aborts a run before any change set is attempted.
    pub fn is_planning_error(&self) -> bool {
        matches!(
            self,
            MigrationError::Cycle { .. }
                | MigrationError::MissingDependency { .. }
                | MigrationError::Validation { .. }
                | MigrationError::Load { .. }
        )
    }

    /// Operation index recorded by a change-set failure.
    pub fn operation_index(&self) -> Option<usize> {
        match self {
            MigrationError::ChangeSetFailed {
                operation_index, ..
            } => *operation_index,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MigrationError::field_not_found("ClassList", "owner");
        assert_eq!(err.to_string(), "field `ClassList.owner` not found");

        let err = MigrationError::Cycle {
            ids: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle among change sets: a, b");
    }

    #[test]
    fn test_change_set_failed_context() {
        let err = MigrationError::ChangeSetFailed {
            change_set: "0004".into(),
            operation_index: Some(1),
            source: Box::new(MigrationError::field_not_found("ClassList", "owner")),
        };

        assert_eq!(
            err.to_string(),
            "change set 0004 failed at operation 1: field `ClassList.owner` not found"
        );
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.operation_index(), Some(1));
        assert!(!err.is_planning_error());
    }

    #[test]
    fn test_planning_errors() {
        let err = MigrationError::MissingDependency {
            change_set: "0004".into(),
            dependency: "0003".into(),
        };
        assert!(err.is_planning_error());
        assert_eq!(err.kind(), ErrorKind::MissingDependency);
        assert!(!MigrationError::Duplicate {
            change_set: "0001".into()
        }
        .is_planning_error());
    }
}
