//! Field definitions for entities.

use super::relation::{DeleteBehavior, RelationDef};
use super::types::{Choice, FieldType};
use rkyv::{Archive, Deserialize, Serialize};

/// A field definition within an entity.
#[derive(
    Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize, serde::Serialize, serde::Deserialize,
)]
#[serde(deny_unknown_fields)]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Field data type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Whether the field accepts null.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub nullable: bool,
    /// Value backfilled into existing rows and used when none is provided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
    /// Maximum length for string-like fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    /// Whether values must be unique across rows.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unique: bool,
    /// Whether this field is the entity's primary key.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub primary_key: bool,
}

/// Default value for a field.
#[derive(
    Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize, serde::Serialize, serde::Deserialize,
)]
#[serde(untagged)]
pub enum DefaultValue {
    /// Integer value.
    Int(i64),
    /// String value.
    String(String),
}

impl std::fmt::Display for DefaultValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DefaultValue::Int(v) => write!(f, "{v}"),
            DefaultValue::String(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<i64> for DefaultValue {
    fn from(value: i64) -> Self {
        DefaultValue::Int(value)
    }
}

impl From<&str> for DefaultValue {
    fn from(value: &str) -> Self {
        DefaultValue::String(value.to_string())
    }
}

impl FieldDef {
    /// Create a new non-null field.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: false,
            default: None,
            max_length: None,
            unique: false,
            primary_key: false,
        }
    }

    /// Create the conventional auto-incrementing `id` primary key.
    pub fn auto_id(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::AutoId).primary_key()
    }

    /// Create a bounded string field.
    pub fn string(name: impl Into<String>, max_length: u32) -> Self {
        Self::new(name, FieldType::String).with_max_length(max_length)
    }

    /// Create an integer field.
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    /// Create a choice field.
    pub fn choice(
        name: impl Into<String>,
        max_length: u32,
        choices: impl IntoIterator<Item = Choice>,
    ) -> Self {
        Self::new(name, FieldType::enum_type(choices)).with_max_length(max_length)
    }

    /// Create a foreign key field.
    pub fn foreign_key(
        name: impl Into<String>,
        target: impl Into<String>,
        on_delete: DeleteBehavior,
    ) -> Self {
        Self::new(name, FieldType::foreign_key(target, on_delete))
    }

    /// Allow null values.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Set the default value.
    pub fn with_default(mut self, default: impl Into<DefaultValue>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Set the maximum length.
    pub fn with_max_length(mut self, max_length: u32) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Mark as unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Mark as the primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Get the relation if this field is a foreign key.
    pub fn relation(&self) -> Option<&RelationDef> {
        self.field_type.relation()
    }

    /// Check if existing rows can be given a value for this field.
    pub fn can_backfill(&self) -> bool {
        self.nullable || self.default.is_some()
    }

    /// Check the definition is self-consistent.
    ///
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        let name = &self.name;
        if name.is_empty() {
            return Err("field name is empty".to_string());
        }

        if self.field_type.is_string_like() {
            match self.max_length {
                None => return Err(format!("field `{name}` needs a max_length")),
                Some(0) => return Err(format!("field `{name}` has a max_length of 0")),
                Some(_) => {}
            }
        } else if self.max_length.is_some() {
            return Err(format!(
                "field `{name}` of type {} cannot have a max_length",
                self.field_type
            ));
        }

        if let Some(choices) = self.field_type.choices() {
            if choices.is_empty() {
                return Err(format!("choice field `{name}` has no choices"));
            }
            for (i, choice) in choices.iter().enumerate() {
                if choices[..i].iter().any(|c| c.value == choice.value) {
                    return Err(format!(
                        "choice field `{name}` repeats the value {:?}",
                        choice.value
                    ));
                }
                if let Some(max) = self.max_length {
                    if choice.value.chars().count() > max as usize {
                        return Err(format!(
                            "choice {:?} of field `{name}` exceeds max_length {max}",
                            choice.value
                        ));
                    }
                }
            }
        }

        if let Some(relation) = self.relation() {
            if relation.target.is_empty() {
                return Err(format!("foreign key `{name}` has no target"));
            }
            if relation.requires_nullable() && !self.nullable {
                return Err(format!(
                    "foreign key `{name}` uses SET_NULL but is not nullable"
                ));
            }
        }

        if self.primary_key {
            if self.nullable {
                return Err(format!("primary key `{name}` cannot be nullable"));
            }
            if self.default.is_some() {
                return Err(format!("primary key `{name}` cannot have a default"));
            }
        } else if self.field_type == FieldType::AutoId {
            return Err(format!("auto_id field `{name}` must be the primary key"));
        }

        if let Some(default) = &self.default {
            self.validate_default(default)?;
        }

        Ok(())
    }

    fn validate_default(&self, default: &DefaultValue) -> Result<(), String> {
        let name = &self.name;
        match (&self.field_type, default) {
            (FieldType::Integer, DefaultValue::Int(_)) => Ok(()),
            (FieldType::String, DefaultValue::String(value))
            | (FieldType::Enum { .. }, DefaultValue::String(value)) => {
                if let Some(max) = self.max_length {
                    if value.chars().count() > max as usize {
                        return Err(format!(
                            "default {value:?} of field `{name}` exceeds max_length {max}"
                        ));
                    }
                }
                if let Some(choices) = self.field_type.choices() {
                    if !choices.iter().any(|c| &c.value == value) {
                        return Err(format!(
                            "default {value:?} of field `{name}` is not one of its choices"
                        ));
                    }
                }
                Ok(())
            }
            (field_type, default) => Err(format!(
                "default {default} does not match type {field_type} of field `{name}`"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term_field() -> FieldDef {
        FieldDef::choice(
            "term",
            30,
            [
                Choice::new("Summer", "SUMMER"),
                Choice::new("Fall", "FALL"),
                Choice::new("Winter", "WINTER"),
                Choice::new("Spring", "SPRING"),
            ],
        )
        .with_default("Fall")
    }

    #[test]
    fn test_field_def_builder() {
        let field = FieldDef::string("username", 20).unique();

        assert_eq!(field.name, "username");
        assert!(!field.nullable);
        assert!(field.unique);
        assert_eq!(field.max_length, Some(20));
        assert!(field.validate().is_ok());
    }

    #[test]
    fn test_auto_id() {
        let id = FieldDef::auto_id("id");
        assert!(id.primary_key);
        assert!(id.validate().is_ok());

        let loose = FieldDef::new("id", FieldType::AutoId);
        assert!(loose.validate().unwrap_err().contains("primary key"));
    }

    #[test]
    fn test_choice_default_must_be_a_choice() {
        assert!(term_field().validate().is_ok());

        let bad = term_field().with_default("Autumn");
        assert!(bad.validate().unwrap_err().contains("not one of its choices"));
    }

    #[test]
    fn test_string_requires_max_length() {
        let field = FieldDef::new("name", FieldType::String);
        assert!(field.validate().unwrap_err().contains("max_length"));

        let too_long = FieldDef::string("phone", 3).with_default("555-1234");
        assert!(too_long.validate().unwrap_err().contains("exceeds max_length"));
    }

    #[test]
    fn test_default_type_mismatch() {
        let year = FieldDef::integer("year").with_default("2022");
        assert!(year.validate().unwrap_err().contains("does not match"));

        let year = FieldDef::integer("year").with_default(2022_i64);
        assert!(year.validate().is_ok());
        assert!(year.can_backfill());
    }

    #[test]
    fn test_set_null_requires_nullable() {
        let field = FieldDef::foreign_key("assignedClass", "ClassList", DeleteBehavior::SetNull);
        assert!(field.validate().unwrap_err().contains("SET_NULL"));
        assert!(field.nullable().validate().is_ok());
    }

    #[test]
    fn test_json_round_trip() {
        let field = term_field();
        let json = serde_json::to_value(&field).unwrap();
        assert_eq!(json["default"], serde_json::json!("Fall"));
        assert!(json.get("nullable").is_none());

        let decoded: FieldDef = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, field);
    }
}
