//! tamigrate command-line runner
//!
//! Plans and applies the change sets in a migrations directory against one
//! environment.

mod commands;
mod formatter;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use formatter::OutputFormat;
use tamigrate_core::migration::config::{DEFAULT_DATA_PATH, DEFAULT_MIGRATIONS_DIR};
use tamigrate_core::MigrationConfig;

/// tamigrate command-line runner
#[derive(Parser, Debug)]
#[command(name = "migrate")]
#[command(version, about = "Plan and apply versioned schema change sets")]
pub struct Args {
    /// Directory holding change-set JSON files
    #[arg(long, global = true, default_value = DEFAULT_MIGRATIONS_DIR)]
    pub migrations: PathBuf,

    /// Environment data directory
    #[arg(long, global = true, default_value = DEFAULT_DATA_PATH)]
    pub data: PathBuf,

    /// Time limit per change set in seconds (0 = none)
    #[arg(long, global = true, default_value_t = 0)]
    pub timeout: u64,

    /// Fold and plan without writing to the store or ledger
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Accept applied change sets whose files changed since
    #[arg(long, global = true)]
    pub no_verify: bool,

    /// Output format
    #[arg(long, global = true, default_value = "table", value_enum)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Runner subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List pending change sets in apply order
    Plan,
    /// Apply pending change sets
    Apply,
    /// Show every change set with its state
    Status,
    /// Show the folded schema, or one entity of it
    Show {
        /// Entity name
        entity: Option<String>,
    },
    /// Load and order change sets without opening the environment
    Validate,
    /// Clear a lock left behind by a crashed run
    Unlock,
}

impl Args {
    /// Convert command-line arguments to a run configuration.
    pub fn to_config(&self) -> MigrationConfig {
        let mut config = MigrationConfig::new(&self.data)
            .with_migrations_dir(&self.migrations)
            .with_dry_run(self.dry_run);
        if self.timeout > 0 {
            config = config.with_operation_timeout(Duration::from_secs(self.timeout));
        }
        if self.no_verify {
            config = config.without_checksum_verification();
        }
        config
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing; logs go to stderr so JSON output stays clean
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tamigrate=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = args.to_config();
    let formatter = formatter::create_formatter(args.format);

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl+c");
            return;
        }
        tracing::warn!("interrupted, stopping after the current change set");
        flag.store(true, Ordering::SeqCst);
    });

    // sled and the store are synchronous; keep them off the runtime threads
    let command = args.command;
    let outcome = tokio::task::spawn_blocking(move || {
        commands::run(&command, config, &*formatter, &cancel)
    })
    .await;

    match outcome {
        Ok(outcome) => {
            if outcome.is_error {
                eprintln!("{}", outcome.output);
            } else if !outcome.output.is_empty() {
                println!("{}", outcome.output);
            }
            std::process::exit(outcome.code);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(commands::EXIT_FAILURE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let args = Args::try_parse_from(["migrate", "plan"]).unwrap();
        assert_eq!(args.command, Command::Plan);
        assert_eq!(args.format, OutputFormat::Table);

        let config = args.to_config();
        assert_eq!(config.data_path, PathBuf::from("./data"));
        assert_eq!(config.migrations_dir, PathBuf::from("./migrations"));
        assert!(config.operation_timeout.is_none());
        assert!(config.verify_checksums);
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let args = Args::try_parse_from([
            "migrate",
            "apply",
            "--data",
            "/tmp/env",
            "--timeout",
            "30",
            "--dry-run",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(args.command, Command::Apply);
        assert_eq!(args.format, OutputFormat::Json);

        let config = args.to_config();
        assert_eq!(config.data_path, PathBuf::from("/tmp/env"));
        assert_eq!(config.operation_timeout, Some(Duration::from_secs(30)));
        assert!(config.dry_run);
    }

    #[test]
    fn test_parse_show_entity() {
        let args = Args::try_parse_from(["migrate", "show", "ClassList"]).unwrap();
        assert_eq!(
            args.command,
            Command::Show {
                entity: Some("ClassList".to_string())
            }
        );
    }
}
