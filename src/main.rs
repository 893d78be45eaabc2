mod logger;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use data::db::{
    MigrationConfig, MigrationDriver, MigrationError, MigrationPlan, ReconciliationReporter,
    TimestampFixer,
};

#[derive(Parser, Debug)]
#[command(name = "clubmigrate", version)]
#[command(about = "Migrate a legacy club database onto the current schema and reconcile the result")]
struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log file (default: clubmigrate-current.log in the data directory)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct Stores {
    /// Legacy store to read from
    #[arg(long)]
    source: PathBuf,

    /// Target store, wiped and rebuilt by `migrate`
    #[arg(long)]
    target: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Wipe the target, migrate every planned table and reconcile
    Migrate {
        /// Migration configuration (JSON)
        #[arg(long)]
        config: PathBuf,

        #[command(flatten)]
        stores: Stores,

        /// Rows per insert batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Copy an existing target aside before wiping it
        #[arg(long)]
        backup: bool,
    },
    /// Compare row counts and sizes of two stores
    Reconcile {
        /// Migration configuration (JSON); bookkeeping defaults apply without one
        #[arg(long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        stores: Stores,

        /// Export the comparison as CSV
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Export the comparison as JSON
        #[arg(long)]
        json: Option<PathBuf>,
    },
    /// Print the resolved migration plan
    Plan {
        #[arg(long)]
        config: PathBuf,
    },
    /// Rewrite non-canonical date/time values in the target
    FixTimestamps {
        #[arg(long)]
        target: PathBuf,

        /// Count what would change without writing
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logger::setup(&cli.log_level, cli.log_file.as_deref()) {
        eprintln!("Failed to set up logging: {}", e);
        return ExitCode::FAILURE;
    }

    let code = match run(cli.command) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    };

    log::logger().flush();
    code
}

fn run(command: Command) -> Result<ExitCode, MigrationError> {
    match command {
        Command::Migrate {
            config,
            stores,
            batch_size,
            backup,
        } => {
            let mut config = MigrationConfig::load(&config)?;
            if let Some(batch_size) = batch_size {
                config = config.with_batch_size(batch_size);
            }
            if backup {
                config = config.with_backup(true);
            }
            config.validate()?;

            let mut driver = MigrationDriver::new(config, stores.source, stores.target);
            let report = driver.run()?;

            println!("{}", report);
            if let Some(reconciliation) = &report.reconciliation {
                println!("{}", reconciliation);
            }

            if report.is_clean() {
                Ok(ExitCode::SUCCESS)
            } else {
                log::warn!("Run {} finished with row count mismatches", report.run_id);
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Reconcile {
            config,
            stores,
            csv,
            json,
        } => {
            let config = match config {
                Some(path) => MigrationConfig::load(&path)?,
                None => MigrationConfig::default(),
            };
            let report = ReconciliationReporter::from_config(&config, &stores.source, &stores.target).run();

            println!("{}", report);
            if let Some(path) = csv {
                report.write_csv(&path)?;
                log::info!("Wrote {}", path.display());
            }
            if let Some(path) = json {
                report.write_json(&path)?;
                log::info!("Wrote {}", path.display());
            }

            Ok(if report.is_clean() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Plan { config } => {
            let config = MigrationConfig::load(&config)?;
            let (plan, warnings) = MigrationPlan::preview(&config)?;

            for (position, table) in plan.iter().enumerate() {
                let marker = if plan.is_divergent(table) { " (divergent)" } else { "" };
                println!("{:>3}. {}{}", position + 1, table, marker);
            }
            for warning in &warnings {
                log::warn!("{}", warning);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::FixTimestamps { target, dry_run } => {
            let report = TimestampFixer::new(target).dry_run(dry_run).run()?;
            println!("{}", report);
            Ok(ExitCode::SUCCESS)
        }
    }
}
