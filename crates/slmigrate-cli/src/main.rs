use anyhow::{Context, Result};
use clap::{ArgAction, ArgGroup, Args, Parser};
use colored::Colorize;
use slmigrate_application::MigrationFacilitator;
use slmigrate_core::{MigrationAction, MigrationError, ServiceId};
use slmigrate_infrastructure::{DumpProcessController, MigrationDirectory, MigrationSettings};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;

const EXIT_PLUGIN_FAILURES: u8 = 1;
const EXIT_FATAL: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "slmigrate")]
#[command(
    version,
    about = "Capture and restore service data between platform deployments",
    long_about = None
)]
#[command(group(
    ArgGroup::new("action")
        .required(true)
        .args(["capture", "restore", "thdbbug"])
))]
struct Cli {
    /// Capture data from the selected services into the migration directory
    #[arg(long)]
    capture: bool,

    /// Restore previously captured data into the selected services
    #[arg(long)]
    restore: bool,

    /// Merge tag history written to the wrong database back into the tag
    /// history database of the same instance. Ignores service selections
    #[arg(long)]
    thdbbug: bool,

    #[command(flatten)]
    services: ServiceSelection,

    /// Migration directory (overrides the configured one)
    #[arg(long, value_name = "PATH")]
    dir: Option<PathBuf>,

    /// Allow restore to delete existing data
    #[arg(long)]
    force: bool,

    /// Source database for --thdbbug
    #[arg(long, value_name = "NAME", default_value = "admin")]
    sourcedb: String,

    /// Settings file (TOML)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Args, Debug, Default)]
struct ServiceSelection {
    /// Tag ingestion and tag history
    #[arg(long)]
    tag: bool,
    /// OPC UA client and its certificates
    #[arg(long)]
    opc: bool,
    /// File ingestion and stored files
    #[arg(long)]
    fis: bool,
    /// Test monitor
    #[arg(long)]
    testmonitor: bool,
    /// Asset performance management
    #[arg(long)]
    asset: bool,
    /// Package repository and its feeds
    #[arg(long)]
    repo: bool,
    /// Tag alarm rules
    #[arg(long)]
    alarms: bool,
    /// User data
    #[arg(long)]
    userdata: bool,
    /// Notifications
    #[arg(long)]
    notification: bool,
    /// Systems state manager and stored states
    #[arg(long)]
    states: bool,
    /// Security settings
    #[arg(long)]
    security: bool,
    /// Every service
    #[arg(long)]
    all: bool,
}

impl ServiceSelection {
    fn services(&self) -> BTreeSet<ServiceId> {
        if self.all {
            return slmigrate_application::all_services();
        }
        [
            (self.tag, ServiceId::Tags),
            (self.opc, ServiceId::Opc),
            (self.fis, ServiceId::Files),
            (self.testmonitor, ServiceId::TestMonitor),
            (self.asset, ServiceId::Assets),
            (self.repo, ServiceId::Repository),
            (self.alarms, ServiceId::AlarmRules),
            (self.userdata, ServiceId::UserData),
            (self.notification, ServiceId::Notifications),
            (self.states, ServiceId::States),
            (self.security, ServiceId::Security),
        ]
        .into_iter()
        .filter_map(|(selected, service)| selected.then_some(service))
        .collect()
    }
}

enum Command {
    Transfer {
        action: MigrationAction,
        services: BTreeSet<ServiceId>,
        force: bool,
    },
    RepairTagHistory {
        source_database: String,
    },
}

impl Cli {
    fn command(&self) -> Command {
        if self.thdbbug {
            if !self.services.services().is_empty() {
                tracing::warn!("--thdbbug ignores service selections");
            }
            return Command::RepairTagHistory {
                source_database: self.sourcedb.clone(),
            };
        }

        let action = if self.restore {
            MigrationAction::Restore
        } else {
            MigrationAction::Capture
        };
        Command::Transfer {
            action,
            services: self.services.services(),
            force: self.force,
        }
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let default_level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let settings = MigrationSettings::load_or_default(cli.config.as_deref())?;
    let root = cli.dir.clone().unwrap_or_else(|| settings.migration_dir.clone());
    let facilitator = MigrationFacilitator::new(
        MigrationDirectory::new(root),
        DumpProcessController::system(settings.engine.clone()),
    );
    let engine = facilitator.shutdown_handle();
    let command = cli.command();

    let task = tokio::task::spawn_blocking(move || match command {
        Command::Transfer {
            action,
            services,
            force,
        } => commands::transfer::run(&settings, facilitator, action, &services, force),
        Command::RepairTagHistory { source_database } => {
            commands::repair::run(&settings, facilitator, &source_database)
        }
    });

    tokio::select! {
        joined = task => joined.context("migration task failed")?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted; stopping database engine");
            engine.shutdown();
            Ok(ExitCode::from(EXIT_INTERRUPTED))
        }
    }
}

/// Exit status for a run that ended in `error`.
///
/// A missing capture only ends a run from the pre-restore checks, so it is a
/// validation failure.
fn exit_status(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<MigrationError>() {
        Some(e) if e.is_fatal() || e.is_missing_capture() => EXIT_FATAL,
        Some(_) => EXIT_PLUGIN_FAILURES,
        None => EXIT_FATAL,
    }
}

fn report_error(error: &anyhow::Error) -> ExitCode {
    eprintln!("{} {:#}", "error:".red().bold(), error);
    if let Some(MigrationError::PreflightFailed(errors)) = error.downcast_ref::<MigrationError>() {
        for e in errors {
            eprintln!("  {} {}", "-".red(), e);
        }
    }
    ExitCode::from(exit_status(error))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => return report_error(&anyhow::Error::from(e).context("failed to start runtime")),
    };

    let code = match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => report_error(&e),
    };
    // An interrupted migration command must not hold up exit.
    runtime.shutdown_background();
    code
}
