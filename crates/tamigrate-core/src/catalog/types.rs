//! Core type definitions for the catalog.

use super::relation::{DeleteBehavior, RelationDef};
use rkyv::{Archive, Deserialize, Serialize};

/// One allowed value of a choice field.
#[derive(
    Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize, serde::Serialize, serde::Deserialize,
)]
#[serde(deny_unknown_fields)]
pub struct Choice {
    /// Stored value.
    pub value: String,
    /// Human readable label.
    pub label: String,
}

impl Choice {
    /// Create a new choice.
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

/// Field data types.
///
/// Serialized externally tagged, so plain types read as `"string"` and the
/// parameterised ones as `{"enum": {...}}` / `{"foreign_key": {...}}`.
#[derive(
    Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum FieldType {
    /// Auto-incrementing 64-bit identifier.
    AutoId,
    /// Signed integer.
    Integer,
    /// UTF-8 string bounded by the field's `max_length`.
    String,
    /// String restricted to a fixed set of choices.
    Enum {
        /// Allowed values, in declaration order.
        choices: Vec<Choice>,
    },
    /// Reference to another entity.
    ForeignKey(RelationDef),
}

impl FieldType {
    /// Create an enum field type.
    pub fn enum_type(choices: impl IntoIterator<Item = Choice>) -> Self {
        FieldType::Enum {
            choices: choices.into_iter().collect(),
        }
    }

    /// Create a foreign key field type.
    pub fn foreign_key(target: impl Into<String>, on_delete: DeleteBehavior) -> Self {
        FieldType::ForeignKey(RelationDef::new(target, on_delete))
    }

    /// Check if values of this type are strings.
    pub fn is_string_like(&self) -> bool {
        matches!(self, FieldType::String | FieldType::Enum { .. })
    }

    /// Get the relation if this is a foreign key.
    pub fn relation(&self) -> Option<&RelationDef> {
        match self {
            FieldType::ForeignKey(relation) => Some(relation),
            _ => None,
        }
    }

    /// Get the choices if this is an enum.
    pub fn choices(&self) -> Option<&[Choice]> {
        match self {
            FieldType::Enum { choices } => Some(choices),
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::AutoId => write!(f, "auto_id"),
            FieldType::Integer => write!(f, "integer"),
            FieldType::String => write!(f, "string"),
            FieldType::Enum { choices } => {
                let values: Vec<&str> = choices.iter().map(|c| c.value.as_str()).collect();
                write!(f, "enum({})", values.join("|"))
            }
            FieldType::ForeignKey(relation) => {
                write!(f, "fk -> {} ({})", relation.target, relation.on_delete)
            }
        }
    }
}
