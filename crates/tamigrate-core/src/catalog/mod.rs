//! Schema catalog for change sets.
//!
//! Entity, field, and relation definitions plus the in-memory registry that
//! folds operations into the current schema.

mod entity;
mod field;
mod registry;
mod relation;
mod types;

pub use entity::EntityDef;
pub use field::{DefaultValue, FieldDef};
pub use registry::SchemaRegistry;
pub use relation::{DeleteBehavior, RelationDef};
pub use types::{Choice, FieldType};
