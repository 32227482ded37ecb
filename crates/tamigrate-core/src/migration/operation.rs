//! Atomic schema operations.

use crate::catalog::FieldDef;
use serde::{Deserialize, Serialize};

/// One atomic schema change.
///
/// Serialized internally tagged on `op`, e.g.
/// `{"op": "rename_field", "entity": "Section", "old_name": "TA", "new_name": "assignedUser"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", deny_unknown_fields)]
pub enum Operation {
    /// Create a new entity.
    CreateEntity {
        /// Entity name.
        name: String,
        /// Initial fields.
        fields: Vec<FieldDef>,
        /// Composite uniqueness constraints.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        unique_together: Vec<Vec<String>>,
    },
    /// Add a field to an existing entity.
    AddField {
        /// Entity name.
        entity: String,
        /// The new field.
        field: FieldDef,
    },
    /// Remove a field.
    RemoveField {
        /// Entity name.
        entity: String,
        /// Field name.
        name: String,
    },
    /// Rename a field, keeping its definition.
    RenameField {
        /// Entity name.
        entity: String,
        /// Current field name.
        old_name: String,
        /// New field name.
        new_name: String,
    },
    /// Replace a field's definition.
    AlterField {
        /// Entity name.
        entity: String,
        /// Field name.
        name: String,
        /// New definition; its name must equal `name`.
        field: FieldDef,
    },
}

impl Operation {
    /// Create an entity.
    pub fn create_entity(name: impl Into<String>, fields: impl IntoIterator<Item = FieldDef>) -> Self {
        Operation::CreateEntity {
            name: name.into(),
            fields: fields.into_iter().collect(),
            unique_together: Vec::new(),
        }
    }

    /// Add a field.
    pub fn add_field(entity: impl Into<String>, field: FieldDef) -> Self {
        Operation::AddField {
            entity: entity.into(),
            field,
        }
    }

    /// Remove a field.
    pub fn remove_field(entity: impl Into<String>, name: impl Into<String>) -> Self {
        Operation::RemoveField {
            entity: entity.into(),
            name: name.into(),
        }
    }

    /// Rename a field.
    pub fn rename_field(
        entity: impl Into<String>,
        old_name: impl Into<String>,
        new_name: impl Into<String>,
    ) -> Self {
        Operation::RenameField {
            entity: entity.into(),
            old_name: old_name.into(),
            new_name: new_name.into(),
        }
    }

    /// Alter a field, keeping its name.
    pub fn alter_field(entity: impl Into<String>, field: FieldDef) -> Self {
        Operation::AlterField {
            entity: entity.into(),
            name: field.name.clone(),
            field,
        }
    }

    /// Entity this operation targets.
    pub fn entity(&self) -> &str {
        match self {
            Operation::CreateEntity { name, .. } => name,
            Operation::AddField { entity, .. }
            | Operation::RemoveField { entity, .. }
            | Operation::RenameField { entity, .. }
            | Operation::AlterField { entity, .. } => entity,
        }
    }

    /// Short operation name, matching the serialized tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::CreateEntity { .. } => "create_entity",
            Operation::AddField { .. } => "add_field",
            Operation::RemoveField { .. } => "remove_field",
            Operation::RenameField { .. } => "rename_field",
            Operation::AlterField { .. } => "alter_field",
        }
    }

    /// Check if the operation discards stored data.
    pub fn is_destructive(&self) -> bool {
        matches!(self, Operation::RemoveField { .. })
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::CreateEntity { name, fields, .. } => {
                write!(f, "create entity {name} ({} fields)", fields.len())
            }
            Operation::AddField { entity, field } => {
                write!(f, "add field {entity}.{} {}", field.name, field.field_type)
            }
            Operation::RemoveField { entity, name } => write!(f, "remove field {entity}.{name}"),
            Operation::RenameField {
                entity,
                old_name,
                new_name,
            } => write!(f, "rename field {entity}.{old_name} to {new_name}"),
            Operation::AlterField { entity, name, field } => {
                write!(f, "alter field {entity}.{name} {}", field.field_type)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_json() {
        let op = Operation::rename_field("Section", "TA", "assignedUser");
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "op": "rename_field",
                "entity": "Section",
                "old_name": "TA",
                "new_name": "assignedUser"
            })
        );
        let decoded: Operation = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, op);
    }

    #[test]
    fn test_create_entity_json_defaults() {
        let json = r#"{
            "op": "create_entity",
            "name": "Schedule",
            "fields": [{"name": "id", "type": "auto_id", "primary_key": true}]
        }"#;
        let op: Operation = serde_json::from_str(json).unwrap();
        assert_eq!(op, Operation::create_entity("Schedule", [FieldDef::auto_id("id")]));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Operation::remove_field("ClassList", "owner").to_string(),
            "remove field ClassList.owner"
        );
        assert_eq!(
            Operation::add_field("ClassList", FieldDef::integer("year")).to_string(),
            "add field ClassList.year integer"
        );
        assert!(Operation::remove_field("ClassList", "owner").is_destructive());
        assert_eq!(Operation::alter_field("MyUser", FieldDef::string("username", 20)).entity(), "MyUser");
    }
}
