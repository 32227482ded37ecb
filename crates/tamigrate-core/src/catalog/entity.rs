//! Entity definitions.

use super::field::FieldDef;
use super::relation::RelationDef;
use crate::error::Error;
use rkyv::{Archive, Deserialize, Serialize};

/// An entity definition (table schema).
#[derive(
    Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize, serde::Serialize, serde::Deserialize,
)]
pub struct EntityDef {
    /// Entity name (unique within the registry).
    pub name: String,
    /// Field definitions, in declaration order.
    pub fields: Vec<FieldDef>,
    /// Composite uniqueness constraints, each a list of field names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unique_together: Vec<Vec<String>>,
}

impl EntityDef {
    /// Create a new entity definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            unique_together: Vec::new(),
        }
    }

    /// Add a field to the entity.
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Add multiple fields.
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = FieldDef>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Add a composite uniqueness constraint.
    pub fn with_unique_together<S: Into<String>>(
        mut self,
        fields: impl IntoIterator<Item = S>,
    ) -> Self {
        self.unique_together
            .push(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Get a field by name.
    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Position of a field by name.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Check if a field exists.
    pub fn has_field(&self, name: &str) -> bool {
        self.field_index(name).is_some()
    }

    /// Field names in declaration order.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Get the primary key field.
    pub fn primary_key(&self) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.primary_key)
    }

    /// Foreign key fields with their relations.
    pub fn relations(&self) -> impl Iterator<Item = (&FieldDef, &RelationDef)> {
        self.fields
            .iter()
            .filter_map(|f| f.relation().map(|rel| (f, rel)))
    }

    /// Check if a field takes part in a composite uniqueness constraint.
    pub fn in_unique_together(&self, field: &str) -> bool {
        self.unique_together
            .iter()
            .any(|group| group.iter().any(|f| f == field))
    }

    /// Serialize the definition to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a definition from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DeleteBehavior;

    fn section() -> EntityDef {
        EntityDef::new("Section")
            .with_field(FieldDef::auto_id("id"))
            .with_field(FieldDef::foreign_key("Class", "ClassList", DeleteBehavior::Cascade))
            .with_field(FieldDef::foreign_key("TA", "MyUser", DeleteBehavior::Cascade))
            .with_field(FieldDef::string("sectionNumber", 10))
            .with_unique_together(["Class", "sectionNumber"])
    }

    #[test]
    fn test_entity_builder() {
        let entity = section();

        assert_eq!(entity.name, "Section");
        assert_eq!(entity.fields.len(), 4);
        assert_eq!(entity.field_names(), vec!["id", "Class", "TA", "sectionNumber"]);
        assert_eq!(entity.primary_key().map(|f| f.name.as_str()), Some("id"));
    }

    #[test]
    fn test_get_field() {
        let entity = section();

        assert!(entity.get_field("TA").is_some());
        assert_eq!(entity.field_index("sectionNumber"), Some(3));
        assert!(entity.get_field("nonexistent").is_none());
        assert!(entity.in_unique_together("Class"));
        assert!(!entity.in_unique_together("TA"));
    }

    #[test]
    fn test_relations() {
        let section = section();
        let targets: Vec<&str> = section
            .relations()
            .map(|(_, rel)| rel.target.as_str())
            .collect();
        assert_eq!(targets, vec!["ClassList", "MyUser"]);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let entity = section();
        let bytes = entity.to_bytes().unwrap();
        let decoded = EntityDef::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, entity);
    }
}
