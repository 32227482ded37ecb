//! Change sets: immutable, ordered groups of operations.
//!
//! A [`ChangeSet`] can only be built through validation, so every value in
//! circulation has a well-formed id and dependency list, valid field
//! definitions, and operations that are consistent in their listed order.

use super::error::MigrationError;
use super::operation::Operation;
use crate::catalog::FieldDef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Serializable authoring form of a change set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangeSetRecord {
    /// Change set identifier.
    pub id: String,
    /// Predecessors that must be applied first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Marks the root change set.
    #[serde(default)]
    pub initial: bool,
    /// Operations, executed in order.
    pub operations: Vec<Operation>,
}

impl ChangeSetRecord {
    /// Create an empty record.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            dependencies: Vec::new(),
            initial: false,
            operations: Vec::new(),
        }
    }

    /// Mark as the initial change set.
    pub fn initial(mut self) -> Self {
        self.initial = true;
        self
    }

    /// Add a dependency.
    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    /// Append an operation.
    pub fn with_operation(mut self, op: Operation) -> Self {
        self.operations.push(op);
        self
    }

    /// Append several operations.
    pub fn with_operations(mut self, ops: impl IntoIterator<Item = Operation>) -> Self {
        self.operations.extend(ops);
        self
    }

    /// Validate into a [`ChangeSet`].
    pub fn build(self) -> Result<ChangeSet, MigrationError> {
        ChangeSet::try_from(self)
    }
}

/// An immutable, validated change set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    record: ChangeSetRecord,
    checksum: String,
}

impl ChangeSet {
    /// Create and validate a change set.
    pub fn new(
        id: impl Into<String>,
        dependencies: impl IntoIterator<Item = String>,
        initial: bool,
        operations: impl IntoIterator<Item = Operation>,
    ) -> Result<Self, MigrationError> {
        ChangeSet::try_from(ChangeSetRecord {
            id: id.into(),
            dependencies: dependencies.into_iter().collect(),
            initial,
            operations: operations.into_iter().collect(),
        })
    }

    /// Change set identifier.
    pub fn id(&self) -> &str {
        &self.record.id
    }

    /// Declared predecessors.
    pub fn dependencies(&self) -> &[String] {
        &self.record.dependencies
    }

    /// Whether this is the root change set.
    pub fn is_initial(&self) -> bool {
        self.record.initial
    }

    /// Operations in execution order.
    pub fn operations(&self) -> &[Operation] {
        &self.record.operations
    }

    /// Hex-encoded blake3 digest of the serialized record.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// The authoring form of this change set.
    pub fn to_record(&self) -> ChangeSetRecord {
        self.record.clone()
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, MigrationError> {
        serde_json::to_string_pretty(&self.record)
            .map_err(|e| MigrationError::Serialization(e.to_string()))
    }

    fn compute_checksum(record: &ChangeSetRecord) -> Result<String, MigrationError> {
        let bytes = serde_json::to_vec(record)
            .map_err(|e| MigrationError::Serialization(e.to_string()))?;
        Ok(hex::encode(blake3::hash(&bytes).as_bytes()))
    }
}

impl TryFrom<ChangeSetRecord> for ChangeSet {
    type Error = MigrationError;

    fn try_from(record: ChangeSetRecord) -> Result<Self, Self::Error> {
        validate_header(&record)?;
        validate_operations(&record)?;
        let checksum = ChangeSet::compute_checksum(&record)?;
        Ok(Self { record, checksum })
    }
}

fn validate_header(record: &ChangeSetRecord) -> Result<(), MigrationError> {
    let id = record.id.as_str();
    if id.trim().is_empty() {
        return Err(MigrationError::validation("<unnamed>", "id is empty"));
    }
    if record.initial && !record.dependencies.is_empty() {
        return Err(MigrationError::validation(
            id,
            "an initial change set cannot declare dependencies",
        ));
    }
    for (i, dep) in record.dependencies.iter().enumerate() {
        if dep == id {
            return Err(MigrationError::validation(id, "depends on itself"));
        }
        if record.dependencies[..i].contains(dep) {
            return Err(MigrationError::validation(
                id,
                format!("dependency {dep} is listed twice"),
            ));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldState {
    Present,
    Absent,
}

/// What the change set itself establishes about one entity.
#[derive(Debug, Default)]
struct EntityScope {
    /// Created by this change set, so its field list is fully known.
    created_here: bool,
    fields: HashMap<String, FieldState>,
}

impl EntityScope {
    fn state(&self, field: &str) -> Option<FieldState> {
        match self.fields.get(field) {
            Some(state) => Some(*state),
            None if self.created_here => Some(FieldState::Absent),
            None => None,
        }
    }
}

/// Simulate the operations in listed order, tracking only what the change set
/// itself establishes. Anything outside that knowledge is left to the
/// registry at apply time.
fn validate_operations(record: &ChangeSetRecord) -> Result<(), MigrationError> {
    let id = record.id.as_str();
    let ops = &record.operations;
    if ops.is_empty() {
        return Err(MigrationError::validation(id, "has no operations"));
    }

    let mut scopes: HashMap<&str, EntityScope> = HashMap::new();
    for (index, op) in ops.iter().enumerate() {
        let fail = |message: String| {
            MigrationError::validation(id, format!("operation {index} ({}): {message}", op.kind()))
        };

        match op {
            Operation::CreateEntity {
                name,
                fields,
                unique_together,
            } => {
                if let Some(scope) = scopes.get(name.as_str()) {
                    return Err(fail(if scope.created_here {
                        format!("entity `{name}` is created twice")
                    } else {
                        format!("entity `{name}` is created after an earlier operation uses it")
                    }));
                }
                let mut scope = EntityScope {
                    created_here: true,
                    fields: HashMap::new(),
                };
                for field in fields {
                    check_field(field, name, index, ops, &scopes).map_err(&fail)?;
                    if scope
                        .fields
                        .insert(field.name.clone(), FieldState::Present)
                        .is_some()
                    {
                        return Err(fail(format!("field `{name}.{}` is declared twice", field.name)));
                    }
                }
                for group in unique_together {
                    if group.is_empty() {
                        return Err(fail(format!("empty unique_together on `{name}`")));
                    }
                    if let Some(missing) = group.iter().find(|f| !scope.fields.contains_key(f.as_str())) {
                        return Err(fail(format!(
                            "unique_together on `{name}` names unknown field `{missing}`"
                        )));
                    }
                }
                scopes.insert(name, scope);
            }
            Operation::AddField { entity, field } => {
                check_field(field, entity, index, ops, &scopes).map_err(&fail)?;
                let scope = scopes.entry(entity).or_default();
                if scope.state(&field.name) == Some(FieldState::Present) {
                    return Err(fail(format!("field `{entity}.{}` already exists", field.name)));
                }
                scope.fields.insert(field.name.clone(), FieldState::Present);
            }
            Operation::RemoveField { entity, name } => {
                require_present(&scopes, entity, name, index, ops).map_err(&fail)?;
                scopes
                    .entry(entity)
                    .or_default()
                    .fields
                    .insert(name.clone(), FieldState::Absent);
            }
            Operation::RenameField {
                entity,
                old_name,
                new_name,
            } => {
                if old_name == new_name {
                    return Err(fail(format!("renames `{entity}.{old_name}` to itself")));
                }
                if new_name.is_empty() {
                    return Err(fail(format!("renames `{entity}.{old_name}` to an empty name")));
                }
                require_present(&scopes, entity, old_name, index, ops).map_err(&fail)?;
                let scope = scopes.entry(entity).or_default();
                if scope.state(new_name) == Some(FieldState::Present) {
                    return Err(fail(format!("field `{entity}.{new_name}` already exists")));
                }
                scope.fields.insert(old_name.clone(), FieldState::Absent);
                scope.fields.insert(new_name.clone(), FieldState::Present);
            }
            Operation::AlterField {
                entity,
                name,
                field,
            } => {
                if &field.name != name {
                    return Err(fail(format!(
                        "alters `{entity}.{name}` with a definition named `{}`",
                        field.name
                    )));
                }
                check_field(field, entity, index, ops, &scopes).map_err(&fail)?;
                require_present(&scopes, entity, name, index, ops).map_err(&fail)?;
                scopes
                    .entry(entity)
                    .or_default()
                    .fields
                    .insert(name.clone(), FieldState::Present);
            }
        }
    }
    Ok(())
}

fn check_field(
    field: &FieldDef,
    owner: &str,
    index: usize,
    ops: &[Operation],
    scopes: &HashMap<&str, EntityScope>,
) -> Result<(), String> {
    field.validate()?;
    if let Some(relation) = field.relation() {
        let target = relation.target.as_str();
        if target != owner && !scopes.contains_key(target) && created_later(ops, index, target) {
            return Err(format!(
                "field `{owner}.{}` references `{target}`, which is created by a later operation",
                field.name
            ));
        }
    }
    Ok(())
}

fn require_present(
    scopes: &HashMap<&str, EntityScope>,
    entity: &str,
    field: &str,
    index: usize,
    ops: &[Operation],
) -> Result<(), String> {
    let state = match scopes.get(entity) {
        Some(scope) => scope.state(field),
        None if created_later(ops, index, entity) => {
            return Err(format!(
                "entity `{entity}` is used before the operation that creates it"
            ));
        }
        None => None,
    };

    match state {
        Some(FieldState::Absent) if added_later(ops, index, entity, field) => Err(format!(
            "field `{entity}.{field}` is used before the operation that adds it"
        )),
        Some(FieldState::Absent) => Err(format!(
            "field `{entity}.{field}` does not exist at this point"
        )),
        _ => Ok(()),
    }
}

fn created_later(ops: &[Operation], index: usize, entity: &str) -> bool {
    ops[index + 1..]
        .iter()
        .any(|op| matches!(op, Operation::CreateEntity { name, .. } if name == entity))
}

fn added_later(ops: &[Operation], index: usize, entity: &str, field: &str) -> bool {
    ops[index + 1..].iter().any(|op| match op {
        Operation::AddField { entity: e, field: f } => e == entity && f.name == field,
        Operation::RenameField {
            entity: e,
            new_name,
            ..
        } => e == entity && new_name == field,
        _ => false,
    })
}
