//! Output formatters for runner results.

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use tamigrate_core::{
    ChangeSetState, EntityDef, FieldDef, MigrationPlan, RunReport, SchemaRegistry,
};

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Format a plan.
    fn format_plan(&self, plan: &MigrationPlan<'_>) -> String;

    /// Format the outcome of an apply run.
    fn format_report(&self, report: &RunReport) -> String;

    /// Format change-set states.
    fn format_status(&self, states: &[ChangeSetState]) -> String;

    /// Format the list of entities in a registry.
    fn format_registry(&self, registry: &SchemaRegistry) -> String;

    /// Format one entity definition.
    fn format_entity(&self, entity: &EntityDef) -> String;

    /// Format an error message.
    fn format_error(&self, error: &str) -> String;

    /// Format a simple message.
    fn format_message(&self, message: &str) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_plan(&self, plan: &MigrationPlan<'_>) -> String {
        if plan.is_empty() {
            return format!(
                "Nothing to apply ({} change set(s) already applied)",
                plan.applied.len()
            );
        }

        let mut table = Table::new();
        table.set_header(vec!["#", "Change set", "Depends on", "Operations"]);
        for (i, cs) in plan.pending.iter().enumerate() {
            table.add_row(vec![
                Cell::new(i + 1),
                Cell::new(cs.id()),
                Cell::new(cs.dependencies().join(", ")),
                Cell::new(cs.operations().len()),
            ]);
        }
        table.to_string()
    }

    fn format_report(&self, report: &RunReport) -> String {
        let mut output = self.format_status(&report.states);
        output.push('\n');

        let summary = if report.dry_run {
            "Dry run: nothing was written".to_string()
        } else {
            format!("{} change set(s) applied", report.applied.len())
        };
        output.push_str(&summary);

        if let Some(failure) = &report.failure {
            output.push_str(&format!("\nFailed: {}", failure));
        }
        if report.cancelled {
            output.push_str("\nCancelled before all change sets were applied");
        }
        output
    }

    fn format_status(&self, states: &[ChangeSetState]) -> String {
        if states.is_empty() {
            return "No change sets".to_string();
        }

        let mut table = Table::new();
        table.set_header(vec!["Change set", "Status", "Applied at", "Error"]);
        for state in states {
            table.add_row(vec![
                Cell::new(&state.change_set_id),
                Cell::new(state.status),
                Cell::new(state.applied_at.map(format_timestamp).unwrap_or_default()),
                Cell::new(state.error.as_deref().unwrap_or("")),
            ]);
        }
        table.to_string()
    }

    fn format_registry(&self, registry: &SchemaRegistry) -> String {
        if registry.is_empty() {
            return "No entities".to_string();
        }

        let mut table = Table::new();
        table.set_header(vec!["Entity", "Fields", "Relations"]);
        for entity in registry.entities() {
            table.add_row(vec![
                Cell::new(&entity.name),
                Cell::new(entity.fields.len()),
                Cell::new(entity.relations().count()),
            ]);
        }
        table.to_string()
    }

    fn format_entity(&self, entity: &EntityDef) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Field", "Type", "Null", "Default", "Max length", "Flags"]);
        for field in &entity.fields {
            table.add_row(vec![
                Cell::new(&field.name),
                Cell::new(&field.field_type),
                Cell::new(if field.nullable { "yes" } else { "no" }),
                Cell::new(
                    field
                        .default
                        .as_ref()
                        .map(|d| d.to_string())
                        .unwrap_or_default(),
                ),
                Cell::new(field.max_length.map(|m| m.to_string()).unwrap_or_default()),
                Cell::new(field_flags(field)),
            ]);
        }

        let mut output = format!("{}\n{}", entity.name, table);
        for group in &entity.unique_together {
            output.push_str(&format!("\nunique together: ({})", group.join(", ")));
        }
        output
    }

    fn format_error(&self, error: &str) -> String {
        format!("Error: {}", error)
    }

    fn format_message(&self, message: &str) -> String {
        message.to_string()
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_plan(&self, plan: &MigrationPlan<'_>) -> String {
        serde_json::json!({
            "applied": plan.applied_ids(),
            "pending": plan.pending_ids(),
        })
        .to_string()
    }

    fn format_report(&self, report: &RunReport) -> String {
        serde_json::json!({
            "states": report.states,
            "applied": report.applied,
            "failure": report.failure.as_ref().map(|e| e.to_string()),
            "cancelled": report.cancelled,
            "dry_run": report.dry_run,
        })
        .to_string()
    }

    fn format_status(&self, states: &[ChangeSetState]) -> String {
        serde_json::to_string(states).unwrap_or_else(|_| "[]".to_string())
    }

    fn format_registry(&self, registry: &SchemaRegistry) -> String {
        let entities: Vec<&EntityDef> = registry.entities().collect();
        serde_json::to_string(&entities).unwrap_or_else(|_| "[]".to_string())
    }

    fn format_entity(&self, entity: &EntityDef) -> String {
        serde_json::to_string(entity).unwrap_or_else(|_| "{}".to_string())
    }

    fn format_error(&self, error: &str) -> String {
        serde_json::json!({
            "error": error
        })
        .to_string()
    }

    fn format_message(&self, message: &str) -> String {
        serde_json::json!({
            "message": message
        })
        .to_string()
    }
}

fn field_flags(field: &FieldDef) -> String {
    let mut flags = Vec::new();
    if field.primary_key {
        flags.push("pk");
    }
    if field.unique {
        flags.push("unique");
    }
    flags.join(",")
}

/// Render a microsecond Unix timestamp in UTC.
fn format_timestamp(micros: u64) -> String {
    i64::try_from(micros)
        .ok()
        .and_then(chrono::DateTime::from_timestamp_micros)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| micros.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tamigrate_core::{ChangeSetStatus, DeleteBehavior};

    fn section() -> EntityDef {
        EntityDef::new("Section").with_fields([
            FieldDef::auto_id("id"),
            FieldDef::foreign_key("assignedUser", "MyUser", DeleteBehavior::Cascade),
            FieldDef::integer("sectionNumber").with_default(0_i64),
        ])
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00 UTC");
        assert_eq!(
            format_timestamp(1_651_447_800_000_000),
            "2022-05-01 23:30:00 UTC"
        );
    }

    #[test]
    fn test_field_flags() {
        assert_eq!(field_flags(&FieldDef::auto_id("id")), "pk");
        assert_eq!(field_flags(&FieldDef::string("name", 20).unique()), "unique");
        assert_eq!(field_flags(&FieldDef::integer("year")), "");
    }

    #[test]
    fn test_table_entity() {
        let output = TableFormatter.format_entity(&section());
        assert!(output.starts_with("Section"));
        assert!(output.contains("assignedUser"));
        assert!(output.contains("sectionNumber"));
    }

    #[test]
    fn test_json_status() {
        let mut state = ChangeSetState::new("0001_initial");
        state.plan();
        let json: serde_json::Value =
            serde_json::from_str(&JsonFormatter.format_status(&[state])).unwrap();
        assert_eq!(json[0]["change_set_id"], "0001_initial");
        assert_eq!(json[0]["status"], "planned");

        let applied = ChangeSetState::already_applied("0001_initial", 5);
        assert_eq!(applied.status, ChangeSetStatus::Applied);
    }

    #[test]
    fn test_json_entity() {
        let json: serde_json::Value =
            serde_json::from_str(&JsonFormatter.format_entity(&section())).unwrap();
        assert_eq!(json["name"], "Section");
        assert_eq!(json["fields"][1]["name"], "assignedUser");
    }

    #[test]
    fn test_json_error() {
        let json: serde_json::Value =
            serde_json::from_str(&JsonFormatter.format_error("boom")).unwrap();
        assert_eq!(json["error"], "boom");
    }
}
