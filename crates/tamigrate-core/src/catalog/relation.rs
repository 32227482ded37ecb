//! Relation definitions between entities.

use rkyv::{Archive, Deserialize, Serialize};

/// Behavior when a referenced entity is deleted.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeleteBehavior {
    /// Delete referencing rows.
    Cascade,
    /// Set the referencing field to null.
    SetNull,
}

impl std::fmt::Display for DeleteBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeleteBehavior::Cascade => write!(f, "CASCADE"),
            DeleteBehavior::SetNull => write!(f, "SET_NULL"),
        }
    }
}

/// A directed reference from the owning entity to a target entity.
///
/// The target must already exist in the registry when the owning field is
/// defined.
#[derive(
    Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize, serde::Serialize, serde::Deserialize,
)]
#[serde(deny_unknown_fields)]
pub struct RelationDef {
    /// Target entity name.
    pub target: String,
    /// Delete behavior.
    pub on_delete: DeleteBehavior,
}

impl RelationDef {
    /// Create a relation to `target`.
    pub fn new(target: impl Into<String>, on_delete: DeleteBehavior) -> Self {
        Self {
            target: target.into(),
            on_delete,
        }
    }

    /// Check if deleting the target nulls out the reference.
    pub fn requires_nullable(&self) -> bool {
        self.on_delete == DeleteBehavior::SetNull
    }
}
