//! Subcommand execution.

use std::sync::atomic::AtomicBool;

use crate::formatter::Formatter;
use crate::Command;
use tamigrate_core::migration::loader;
use tamigrate_core::{MigrationConfig, MigrationError, MigrationLock, Migrator, Planner};

/// Everything succeeded.
pub const EXIT_SUCCESS: i32 = 0;
/// A change set failed or the environment is unusable.
pub const EXIT_FAILURE: i32 = 1;
/// The change sets themselves are invalid (cycle, missing dependency, bad file).
pub const EXIT_INVALID: i32 = 2;

/// Rendered result of a subcommand.
#[derive(Debug)]
pub struct Outcome {
    /// Text to print.
    pub output: String,
    /// Process exit code.
    pub code: i32,
    /// Print to stderr instead of stdout.
    pub is_error: bool,
}

impl Outcome {
    fn success(output: String) -> Self {
        Self {
            output,
            code: EXIT_SUCCESS,
            is_error: false,
        }
    }

    fn error(output: String, code: i32) -> Self {
        Self {
            output,
            code,
            is_error: true,
        }
    }
}

/// Exit code for an error that aborted a subcommand.
pub fn exit_code(err: &MigrationError) -> i32 {
    if err.is_planning_error() {
        EXIT_INVALID
    } else {
        EXIT_FAILURE
    }
}

/// Run a subcommand and render its result.
pub fn run(
    command: &Command,
    config: MigrationConfig,
    formatter: &dyn Formatter,
    cancel: &AtomicBool,
) -> Outcome {
    match execute(command, config, formatter, cancel) {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            Outcome::error(formatter.format_error(&e.to_string()), exit_code(&e))
        }
    }
}

fn execute(
    command: &Command,
    config: MigrationConfig,
    formatter: &dyn Formatter,
    cancel: &AtomicBool,
) -> Result<Outcome, MigrationError> {
    match command {
        Command::Validate => {
            let change_sets = loader::load_dir(&config.migrations_dir)?;
            let order = Planner::order(&change_sets)?;
            Ok(Outcome::success(formatter.format_message(&format!(
                "{} change set(s) are valid",
                order.len()
            ))))
        }

        Command::Plan => {
            let change_sets = loader::load_dir(&config.migrations_dir)?;
            let migrator = Migrator::open(config)?;
            let plan = migrator.plan(&change_sets)?;
            Ok(Outcome::success(formatter.format_plan(&plan)))
        }

        Command::Apply => {
            let change_sets = loader::load_dir(&config.migrations_dir)?;
            let mut migrator = Migrator::open(config)?;
            let report = migrator.run(&change_sets, cancel)?;
            let code = if report.is_success() {
                EXIT_SUCCESS
            } else {
                EXIT_FAILURE
            };
            Ok(Outcome {
                output: formatter.format_report(&report),
                code,
                is_error: false,
            })
        }

        Command::Status => {
            let change_sets = loader::load_dir(&config.migrations_dir)?;
            let migrator = Migrator::open(config)?;
            let states = migrator.status(&change_sets)?;
            Ok(Outcome::success(formatter.format_status(&states)))
        }

        Command::Show { entity } => {
            let change_sets = loader::load_dir(&config.migrations_dir)?;
            let migrator = Migrator::open(config)?;
            let plan = migrator.plan(&change_sets)?;
            let registry = migrator.fold(&plan)?;
            let output = match entity {
                Some(name) => formatter.format_entity(registry.current_definition(name)?),
                None => formatter.format_registry(&registry),
            };
            Ok(Outcome::success(output))
        }

        Command::Unlock => {
            let migrator = Migrator::open(config)?;
            let message = match MigrationLock::force_release(migrator.db())? {
                Some(holder) => format!("Released lock held by {}", holder),
                None => "Lock was not held".to_string(),
            };
            Ok(Outcome::success(formatter.format_message(&message)))
        }
    }
}
