use anyhow::Result;
use colored::Colorize;
use slmigrate_application::registry::{NOSQL_CONFIG_NAME, TAG_HISTORIAN_CONFIG_NAME};
use slmigrate_application::{MigrationFacilitator, RepairRequest};
use slmigrate_core::ConnectionConfig;
use slmigrate_infrastructure::{DatabaseConnector, MigrationSettings, ServiceConfigLoader};
use std::process::ExitCode;

pub fn run(
    settings: &MigrationSettings,
    facilitator: MigrationFacilitator,
    source_database: &str,
) -> Result<ExitCode> {
    let loader = ServiceConfigLoader::new(&settings.service_config_dir);
    let destination = loader.load_connection(TAG_HISTORIAN_CONFIG_NAME)?;
    let instance = loader.load_connection(NOSQL_CONFIG_NAME)?;

    let request = RepairRequest {
        source_database: source_database.to_string(),
        destination_database: destination.database().to_string(),
    };
    let connector = connect(&instance)?;
    let report = facilitator.repair_tag_history(connector.as_ref(), &request)?;

    println!();
    println!(
        "  values:   {} copied, {} already present",
        report.values_inserted, report.values_skipped
    );
    println!(
        "  metadata: {} copied, {} already present",
        report.metadata_inserted, report.metadata_skipped
    );
    println!(
        "  conflicts: {} resolved, {} values relinked",
        report.conflicts_resolved, report.values_relinked
    );
    println!(
        "\n{}",
        format!(
            "Tag history merged from '{}' into '{}'",
            request.source_database, request.destination_database
        )
        .green()
        .bold()
    );
    Ok(ExitCode::SUCCESS)
}

#[cfg(feature = "mongo")]
fn connect(config: &ConnectionConfig) -> Result<Box<dyn DatabaseConnector>> {
    let connector = slmigrate_infrastructure::store::MongoConnector::connect(config)?;
    Ok(Box::new(connector))
}

#[cfg(not(feature = "mongo"))]
fn connect(_config: &ConnectionConfig) -> Result<Box<dyn DatabaseConnector>> {
    Err(slmigrate_core::MigrationError::Engine(
        "this build has no MongoDB support; rebuild slmigrate with `--features mongo`".to_string(),
    )
    .into())
}
