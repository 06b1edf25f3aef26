//! `stratum` CLI: runs schema migrations from a deployment pipeline.
//!
//! Reads a TOML configuration file naming the database file and the
//! migration tree, then dispatches to the library operations. Exit codes
//! are derived from the error taxonomy's machine codes so pipelines can
//! branch without parsing output.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Deserialize;

use stratum::sqlite::SqliteConn;
use stratum::{InitOptions, MigrateOptions, MigrationConfig, MigrationError, Migrator, RunContext};

#[derive(Parser)]
#[command(name = "stratum", version, about = "Versioned schema-migration runner")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, short, default_value = "stratum.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bootstrap a fresh database: bookkeeping tables, the init baseline,
    /// and ledger back-fill for on-disk versions.
    Init {
        /// Do not back-fill ledger rows for non-init versions.
        #[arg(long)]
        skip_backfill: bool,
        /// Run only the init task at this 1-based position.
        #[arg(long)]
        only: Option<usize>,
        /// Suppress configured lifecycle hooks.
        #[arg(long)]
        disable_hooks: bool,
        /// Record init tasks without executing their bodies.
        #[arg(long)]
        no_scripts: bool,
    },
    /// Apply pending migrations.
    Migrate {
        /// Restrict the run to exactly this version.
        #[arg(long)]
        version: Option<String>,
        /// Run only the task at this 1-based position (requires --version).
        #[arg(long)]
        only: Option<usize>,
        /// Exclude the task at this 1-based position (requires --version).
        #[arg(long, conflicts_with = "only")]
        skip: Option<usize>,
        /// Include versions beyond the configured target.
        #[arg(long)]
        force: bool,
        /// Initialize first when the database has never been initialized.
        #[arg(long)]
        init: bool,
    },
    /// Drop everything in the target database, bookkeeping included.
    Reset {
        /// Confirm the destructive operation.
        #[arg(long)]
        yes: bool,
    },
    /// Report migration state and the advisory lock, and exit non-zero
    /// when the database is not healthy.
    Status,
}

/// The TOML configuration file: the database location plus the library's
/// migration configuration.
#[derive(Debug, Deserialize)]
struct FileConfig {
    /// SQLite database file path.
    database: PathBuf,
    #[serde(flatten)]
    migration: MigrationConfig,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error[{}]: {}", e.code(), e);
            ExitCode::from(exit_code(&e))
        }
    }
}

fn run(cli: Cli) -> Result<(), MigrationError> {
    let raw = std::fs::read_to_string(&cli.config).map_err(|e| {
        MigrationError::Config(format!(
            "cannot read configuration file {}: {e}",
            cli.config.display()
        ))
    })?;
    let file_config: FileConfig = toml::from_str(&raw).map_err(|e| {
        MigrationError::Config(format!(
            "invalid configuration in {}: {e}",
            cli.config.display()
        ))
    })?;

    let migrator = Migrator::new(file_config.migration);
    let mut conn = SqliteConn::open(&file_config.database)?;

    match cli.command {
        Command::Init {
            skip_backfill,
            only,
            disable_hooks,
            no_scripts,
        } => {
            let report = migrator.init(
                &mut conn,
                &InitOptions {
                    skip_backfill,
                    only,
                    disable_hooks,
                    no_scripts,
                },
            )?;
            println!(
                "initialized: {} task(s) executed, {} back-filled, {} skipped",
                report.executed.len(),
                report.backfilled.len(),
                report.skipped.len()
            );
        }
        Command::Migrate {
            version,
            only,
            skip,
            force,
            init,
        } => {
            let report = migrator.migrate(
                &mut conn,
                &MigrateOptions {
                    version,
                    only,
                    skip,
                    force,
                    init,
                },
            )?;
            for warning in &report.warnings {
                eprintln!("warning: {warning}");
            }
            for task in &report.executed {
                println!("applied {} ({})", task.name, task.version);
            }
            println!(
                "migrate: {} task(s) applied, {} skipped",
                report.executed.len(),
                report.skipped.len()
            );
        }
        Command::Reset { yes } => {
            if !yes {
                return Err(MigrationError::Config(
                    "reset drops every object in the database; re-run with --yes to confirm"
                        .to_string(),
                ));
            }
            migrator.reset(&mut conn)?;
            println!("reset: database emptied; run `stratum init` to re-create the baseline");
        }
        Command::Status => {
            let report = migrator.integrity_check(&mut conn, false)?;
            for warning in &report.warnings {
                eprintln!("warning: {warning}");
            }
            println!(
                "baseline: {}",
                report.baseline.as_deref().unwrap_or("(uninitialized)")
            );
            for entry in &report.entries {
                let state = if entry.is_corrupt() {
                    "INCONSISTENT"
                } else if entry.is_pending() {
                    "pending"
                } else {
                    "ok"
                };
                println!(
                    "  {:<12} expected {:>3}  recorded {:>3}  {}",
                    entry.version, entry.expected, entry.actual, state
                );
            }
            let mut ctx = RunContext::new(&mut conn);
            let locked = stratum::LockManager::new(migrator.config()).is_locked(&mut ctx)?;
            println!("lock: {}", if locked { "held" } else { "free" });
            drop(ctx);
            migrator.is_database_ok(&mut conn)?;
        }
    }
    Ok(())
}

/// Map the error taxonomy onto stable process exit codes.
fn exit_code(e: &MigrationError) -> u8 {
    match e.code() {
        "CONFIG_ERROR" => 2,
        "DB_NOT_INITIALISED" | "MIGRATION_TABLE_IS_MISSING" => 3,
        "DB_NEEDS_MIGRATION" => 4,
        "MIGRATIONS_LOCKED" => 5,
        "MIGRATION_SCRIPT_FAILED" => 6,
        "MIGRATION_STATE_ERROR" => 7,
        _ => 1,
    }
}
