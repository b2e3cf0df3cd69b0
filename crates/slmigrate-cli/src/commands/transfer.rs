use anyhow::Result;
use colored::Colorize;
use slmigrate_application::{MigrationFacilitator, MigrationReport, PluginRegistry};
use slmigrate_core::{MigrationAction, ServiceId};
use slmigrate_infrastructure::MigrationSettings;
use std::collections::BTreeSet;
use std::process::ExitCode;

use crate::EXIT_PLUGIN_FAILURES;

pub fn run(
    settings: &MigrationSettings,
    facilitator: MigrationFacilitator,
    action: MigrationAction,
    services: &BTreeSet<ServiceId>,
    force: bool,
) -> Result<ExitCode> {
    let registry = PluginRegistry::resolve(settings, services)?;
    let root = facilitator.directory().root().to_path_buf();
    let report = facilitator.transfer(action, &registry, services, force)?;
    print_report(&report, root.display());

    if report.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_PLUGIN_FAILURES))
    }
}

fn print_report(report: &MigrationReport, root: impl std::fmt::Display) {
    let width = report
        .outcomes
        .iter()
        .map(|o| o.plugin.len())
        .max()
        .unwrap_or(0);

    println!();
    for outcome in &report.outcomes {
        match outcome.error() {
            None => println!("  {} {:width$}", "✓".green(), outcome.plugin),
            Some(e) => println!(
                "  {} {:width$}  {}",
                "✗".red(),
                outcome.plugin,
                e.to_string().red()
            ),
        }
    }

    let failed = report.failures().count();
    let summary = format!(
        "{} {}: {} succeeded, {} failed ({})",
        report.action,
        if failed == 0 { "completed" } else { "finished with errors" },
        report.outcomes.len() - failed,
        failed,
        root
    );
    if failed == 0 {
        println!("\n{}", summary.green().bold());
    } else {
        println!("\n{}", summary.red().bold());
    }
}
