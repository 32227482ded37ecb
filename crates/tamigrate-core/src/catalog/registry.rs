//! In-memory schema registry.
//!
//! Holds the entity definitions obtained by folding applied operations in
//! order. Every mutation validates first and only then changes state, so a
//! rejected operation leaves the registry untouched.

use super::{EntityDef, FieldDef};
use crate::migration::{MigrationError, Operation};
use std::collections::BTreeMap;

/// The current set of entity definitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaRegistry {
    entities: BTreeMap<String, EntityDef>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a sequence of operations into a fresh registry.
    pub fn fold<'a>(ops: impl IntoIterator<Item = &'a Operation>) -> Result<Self, MigrationError> {
        let mut registry = Self::new();
        for op in ops {
            registry.apply_operation(op)?;
        }
        Ok(registry)
    }

    /// Apply one operation.
    pub fn apply_operation(&mut self, op: &Operation) -> Result<(), MigrationError> {
        match op {
            Operation::CreateEntity {
                name,
                fields,
                unique_together,
            } => self.create_entity(name, fields, unique_together),
            Operation::AddField { entity, field } => self.add_field(entity, field),
            Operation::RemoveField { entity, name } => self.remove_field(entity, name),
            Operation::RenameField {
                entity,
                old_name,
                new_name,
            } => self.rename_field(entity, old_name, new_name),
            Operation::AlterField {
                entity,
                name,
                field,
            } => self.alter_field(entity, name, field),
        }
    }

    /// Get the folded-to-date definition of an entity.
    pub fn current_definition(&self, name: &str) -> Result<&EntityDef, MigrationError> {
        self.entities
            .get(name)
            .ok_or_else(|| MigrationError::entity_not_found(name))
    }

    /// Check if an entity exists.
    pub fn contains_entity(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    /// Entity names in sorted order.
    pub fn entity_names(&self) -> Vec<&str> {
        self.entities.keys().map(String::as_str).collect()
    }

    /// All entity definitions in name order.
    pub fn entities(&self) -> impl Iterator<Item = &EntityDef> {
        self.entities.values()
    }

    /// Number of entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check if the registry has no entities.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    fn create_entity(
        &mut self,
        name: &str,
        fields: &[FieldDef],
        unique_together: &[Vec<String>],
    ) -> Result<(), MigrationError> {
        if self.entities.contains_key(name) {
            return Err(MigrationError::schema(format!(
                "entity `{name}` already exists"
            )));
        }

        for (i, field) in fields.iter().enumerate() {
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(MigrationError::schema(format!(
                    "entity `{name}` declares field `{}` twice",
                    field.name
                )));
            }
            self.check_field(name, field)?;
        }

        if fields.iter().filter(|f| f.primary_key).count() > 1 {
            return Err(MigrationError::schema(format!(
                "entity `{name}` declares more than one primary key"
            )));
        }

        for group in unique_together {
            if let Some(missing) = group.iter().find(|f| !fields.iter().any(|d| &d.name == *f)) {
                return Err(MigrationError::schema(format!(
                    "unique_together on `{name}` names unknown field `{missing}`"
                )));
            }
        }

        let entity = EntityDef {
            name: name.to_string(),
            fields: fields.to_vec(),
            unique_together: unique_together.to_vec(),
        };
        self.entities.insert(name.to_string(), entity);
        Ok(())
    }

    fn add_field(&mut self, entity: &str, field: &FieldDef) -> Result<(), MigrationError> {
        let current = self.current_definition(entity)?;
        if current.has_field(&field.name) {
            return Err(MigrationError::schema(format!(
                "field `{entity}.{}` already exists",
                field.name
            )));
        }
        if field.primary_key {
            return Err(MigrationError::schema(format!(
                "cannot add primary key `{entity}.{}` to an existing entity",
                field.name
            )));
        }
        if !field.can_backfill() {
            return Err(MigrationError::schema(format!(
                "field `{entity}.{}` is not nullable and has no default to backfill existing rows",
                field.name
            )));
        }
        self.check_field(entity, field)?;

        self.entity_mut(entity)?.fields.push(field.clone());
        Ok(())
    }

    fn remove_field(&mut self, entity: &str, name: &str) -> Result<(), MigrationError> {
        let current = self.current_definition(entity)?;
        let index = current
            .field_index(name)
            .ok_or_else(|| MigrationError::field_not_found(entity, name))?;
        if current.fields[index].primary_key {
            return Err(MigrationError::schema(format!(
                "cannot remove primary key `{entity}.{name}`"
            )));
        }
        if current.in_unique_together(name) {
            return Err(MigrationError::schema(format!(
                "cannot remove `{entity}.{name}`: it is part of a unique_together constraint"
            )));
        }

        self.entity_mut(entity)?.fields.remove(index);
        Ok(())
    }

    fn rename_field(
        &mut self,
        entity: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<(), MigrationError> {
        let current = self.current_definition(entity)?;
        let index = current
            .field_index(old_name)
            .ok_or_else(|| MigrationError::field_not_found(entity, old_name))?;
        if new_name.is_empty() {
            return Err(MigrationError::schema(format!(
                "cannot rename `{entity}.{old_name}` to an empty name"
            )));
        }
        if current.has_field(new_name) {
            return Err(MigrationError::schema(format!(
                "cannot rename `{entity}.{old_name}`: field `{new_name}` already exists"
            )));
        }

        let def = self.entity_mut(entity)?;
        def.fields[index].name = new_name.to_string();
        for group in &mut def.unique_together {
            for field in group.iter_mut().filter(|f| f.as_str() == old_name) {
                *field = new_name.to_string();
            }
        }
        Ok(())
    }

    fn alter_field(
        &mut self,
        entity: &str,
        name: &str,
        field: &FieldDef,
    ) -> Result<(), MigrationError> {
        let current = self.current_definition(entity)?;
        let index = current
            .field_index(name)
            .ok_or_else(|| MigrationError::field_not_found(entity, name))?;
        if field.name != name {
            return Err(MigrationError::schema(format!(
                "altering `{entity}.{name}` cannot rename it to `{}`",
                field.name
            )));
        }
        if field.primary_key != current.fields[index].primary_key {
            return Err(MigrationError::schema(format!(
                "altering `{entity}.{name}` cannot change its primary key flag"
            )));
        }
        self.check_field(entity, field)?;

        self.entity_mut(entity)?.fields[index] = field.clone();
        Ok(())
    }

    /// Check definition-level validity and referential integrity of a field
    /// owned by `entity`.
    fn check_field(&self, entity: &str, field: &FieldDef) -> Result<(), MigrationError> {
        field
            .validate()
            .map_err(|message| MigrationError::schema(format!("{entity}: {message}")))?;

        if let Some(relation) = field.relation() {
            // Self references are allowed: the owning entity exists by the
            // time rows are written.
            if relation.target != entity && !self.entities.contains_key(&relation.target) {
                return Err(MigrationError::schema(format!(
                    "field `{entity}.{}` references unknown entity `{}`",
                    field.name, relation.target
                )));
            }
        }
        Ok(())
    }

    fn entity_mut(&mut self, name: &str) -> Result<&mut EntityDef, MigrationError> {
        self.entities
            .get_mut(name)
            .ok_or_else(|| MigrationError::entity_not_found(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Choice, DeleteBehavior};
    use crate::migration::ErrorKind;

    fn base() -> SchemaRegistry {
        SchemaRegistry::fold(&[
            Operation::create_entity(
                "ClassList",
                [FieldDef::auto_id("id"), FieldDef::string("name", 20)],
            ),
            Operation::create_entity(
                "MyUser",
                [
                    FieldDef::auto_id("id"),
                    FieldDef::string("username", 20),
                    FieldDef::string("password", 20),
                ],
            ),
            Operation::add_field(
                "ClassList",
                FieldDef::foreign_key("owner", "MyUser", DeleteBehavior::Cascade).nullable(),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_fold_creates_entities() {
        let registry = base();

        assert_eq!(registry.entity_names(), vec!["ClassList", "MyUser"]);
        let classes = registry.current_definition("ClassList").unwrap();
        assert_eq!(classes.field_names(), vec!["id", "name", "owner"]);
    }

    #[test]
    fn test_current_definition_not_found() {
        let err = base().current_definition("Schedule").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_duplicate_entity_and_field() {
        let mut registry = base();

        let err = registry
            .apply_operation(&Operation::create_entity("MyUser", [FieldDef::auto_id("id")]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);

        let err = registry
            .apply_operation(&Operation::add_field(
                "MyUser",
                FieldDef::string("username", 30).nullable(),
            ))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
    }

    #[test]
    fn test_relation_requires_existing_target() {
        let mut registry = base();
        let op = Operation::create_entity(
            "Section",
            [
                FieldDef::auto_id("id"),
                FieldDef::foreign_key("schedule", "Schedule", DeleteBehavior::Cascade),
            ],
        );

        let err = registry.apply_operation(&op).unwrap_err();
        assert!(err.to_string().contains("unknown entity `Schedule`"));
        assert!(!registry.contains_entity("Section"));
    }

    #[test]
    fn test_rename_and_remove() {
        let mut registry = base();
        registry
            .apply_operation(&Operation::rename_field("MyUser", "username", "login"))
            .unwrap();
        registry
            .apply_operation(&Operation::remove_field("ClassList", "owner"))
            .unwrap();

        let user = registry.current_definition("MyUser").unwrap();
        assert!(user.has_field("login"));
        assert!(!user.has_field("username"));
        assert!(!registry.current_definition("ClassList").unwrap().has_field("owner"));
    }

    #[test]
    fn test_rename_missing_field() {
        let mut registry = base();
        let before = registry.clone();

        let err = registry
            .apply_operation(&Operation::rename_field("MyUser", "ta", "assignedUser"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(registry, before);
    }

    #[test]
    fn test_rename_collision() {
        let mut registry = base();
        let err = registry
            .apply_operation(&Operation::rename_field("MyUser", "username", "password"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
    }

    #[test]
    fn test_cannot_remove_primary_key() {
        let mut registry = base();
        let err = registry
            .apply_operation(&Operation::remove_field("MyUser", "id"))
            .unwrap_err();
        assert!(err.to_string().contains("primary key"));
    }

    #[test]
    fn test_add_field_needs_backfill_value() {
        let mut registry = base();

        let err = registry
            .apply_operation(&Operation::add_field("ClassList", FieldDef::integer("year")))
            .unwrap_err();
        assert!(err.to_string().contains("backfill"));

        registry
            .apply_operation(&Operation::add_field(
                "ClassList",
                FieldDef::integer("year").with_default(2022_i64),
            ))
            .unwrap();
    }

    #[test]
    fn test_alter_field() {
        let mut registry = base();
        registry
            .apply_operation(&Operation::alter_field(
                "ClassList",
                FieldDef::string("name", 20).unique(),
            ))
            .unwrap();
        let name = registry
            .current_definition("ClassList")
            .unwrap()
            .get_field("name")
            .unwrap();
        assert!(name.unique);

        let err = registry
            .apply_operation(&Operation::AlterField {
                entity: "ClassList".into(),
                name: "name".into(),
                field: FieldDef::string("title", 20),
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
    }

    #[test]
    fn test_alter_field_validates_choices() {
        let mut registry = base();
        registry
            .apply_operation(&Operation::add_field(
                "ClassList",
                FieldDef::choice("term", 30, [Choice::new("Fall", "FALL")]).with_default("Fall"),
            ))
            .unwrap();

        let err = registry
            .apply_operation(&Operation::alter_field(
                "ClassList",
                FieldDef::choice("term", 30, [Choice::new("Fall", "FALL")]).with_default("Winter"),
            ))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
    }

    #[test]
    fn test_rename_updates_unique_together() {
        let mut registry = base();
        registry
            .apply_operation(&Operation::CreateEntity {
                name: "Section".into(),
                fields: vec![
                    FieldDef::auto_id("id"),
                    FieldDef::foreign_key("Class", "ClassList", DeleteBehavior::Cascade),
                    FieldDef::string("sectionNumber", 10),
                ],
                unique_together: vec![vec!["Class".into(), "sectionNumber".into()]],
            })
            .unwrap();

        registry
            .apply_operation(&Operation::rename_field("Section", "sectionNumber", "number"))
            .unwrap();
        let section = registry.current_definition("Section").unwrap();
        assert_eq!(
            section.unique_together,
            vec![vec!["Class".to_string(), "number".to_string()]]
        );

        let err = registry
            .apply_operation(&Operation::remove_field("Section", "number"))
            .unwrap_err();
        assert!(err.to_string().contains("unique_together"));
    }
}
