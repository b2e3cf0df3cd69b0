//! Outcome of a capture or restore run.

use slmigrate_core::{MigrationAction, MigrationError, Result, ServiceId};

/// Result of one plugin's capture or restore.
#[derive(Debug)]
pub struct PluginOutcome {
    pub plugin: String,
    pub service: ServiceId,
    pub result: Result<()>,
}

impl PluginOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&MigrationError> {
        self.result.as_ref().err()
    }
}

/// Per-plugin outcomes of a run, in execution order.
#[derive(Debug)]
pub struct MigrationReport {
    pub action: MigrationAction,
    pub outcomes: Vec<PluginOutcome>,
}

impl MigrationReport {
    pub fn new(action: MigrationAction) -> Self {
        Self {
            action,
            outcomes: Vec::new(),
        }
    }

    pub fn record(&mut self, plugin: impl Into<String>, service: ServiceId, result: Result<()>) {
        self.outcomes.push(PluginOutcome {
            plugin: plugin.into(),
            service,
            result,
        });
    }

    /// True when every plugin succeeded.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(PluginOutcome::is_success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &PluginOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.is_success())
    }

    /// Names of the plugins that ran, in order.
    pub fn plugins(&self) -> Vec<&str> {
        self.outcomes.iter().map(|o| o.plugin.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_collects_failures() {
        let mut report = MigrationReport::new(MigrationAction::Capture);
        report.record("TagHistorian", ServiceId::Tags, Ok(()));
        assert!(report.is_success());

        report.record(
            "UserData",
            ServiceId::UserData,
            Err(MigrationError::DumpFailed {
                database: "niuserdata".into(),
                code: Some(1),
            }),
        );
        report.record("Notification", ServiceId::Notifications, Ok(()));

        assert!(!report.is_success());
        let failed: Vec<_> = report.failures().map(|o| o.plugin.as_str()).collect();
        assert_eq!(failed, vec!["UserData"]);
        assert_eq!(
            report.plugins(),
            vec!["TagHistorian", "UserData", "Notification"]
        );
    }
}
