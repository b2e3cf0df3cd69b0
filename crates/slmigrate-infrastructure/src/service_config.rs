//! Reads per-service database configuration files.
//!
//! Each service ships `<config dir>/<Name>.json`, keyed by the service name:
//!
//! ```json
//! {
//!   "TagHistorian": {
//!     "Mongo.Host": "localhost",
//!     "Mongo.Port": 27018,
//!     "Mongo.User": "...",
//!     "Mongo.Password": "...",
//!     "Mongo.Database": "nitaghistorian"
//!   }
//! }
//! ```
//!
//! The loosely-typed keys are turned into a [`ConnectionConfig`] here so that
//! nothing downstream has to ask whether a key is present.

use serde::Deserialize;
use serde_json::Value;
use slmigrate_core::{ConnectionConfig, MigrationError, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_HOST: &str = "localhost";

#[derive(Debug, Default, Deserialize)]
struct RawMongoSection {
    #[serde(rename = "Mongo.Host")]
    host: Option<String>,
    #[serde(rename = "Mongo.Port")]
    port: Option<Value>,
    #[serde(rename = "Mongo.User")]
    user: Option<String>,
    #[serde(rename = "Mongo.Password")]
    password: Option<String>,
    #[serde(rename = "Mongo.Database")]
    database: Option<String>,
    #[serde(rename = "Mongo.CustomConnectionString")]
    custom_connection_string: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn non_empty_value(value: Option<Value>) -> Option<Value> {
    value.filter(|v| match v {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    })
}

/// Loads connection configuration for services by name.
#[derive(Debug, Clone)]
pub struct ServiceConfigLoader {
    config_dir: PathBuf,
}

impl ServiceConfigLoader {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// Path of the configuration file for `config_name`.
    pub fn config_path(&self, config_name: &str) -> PathBuf {
        self.config_dir.join(format!("{}.json", config_name))
    }

    /// Reads and validates the connection configuration of a service.
    pub fn load_connection(&self, config_name: &str) -> Result<ConnectionConfig> {
        let path = self.config_path(config_name);
        let content = read_config_file(config_name, &path)?;
        parse_connection(config_name, &content)
    }
}

fn read_config_file(config_name: &str, path: &Path) -> Result<String> {
    let content = fs::read_to_string(path).map_err(|e| {
        MigrationError::configuration(
            config_name,
            format!("cannot read {}: {}", path.display(), e),
        )
    })?;
    // Service configuration files are written with a UTF-8 BOM.
    if let Some(stripped) = content.strip_prefix('\u{feff}') {
        return Ok(stripped.to_string());
    }
    Ok(content)
}

/// Parses the JSON configuration document of `config_name`.
pub fn parse_connection(config_name: &str, content: &str) -> Result<ConnectionConfig> {
    let mut sections: HashMap<String, Value> = serde_json::from_str(content)
        .map_err(|e| MigrationError::configuration(config_name, format!("invalid JSON: {}", e)))?;

    let section = sections.remove(config_name).ok_or_else(|| {
        MigrationError::configuration(config_name, format!("missing '{}' section", config_name))
    })?;
    let raw: RawMongoSection = serde_json::from_value(section)
        .map_err(|e| MigrationError::configuration(config_name, e.to_string()))?;

    into_connection(config_name, raw)
}

fn into_connection(config_name: &str, raw: RawMongoSection) -> Result<ConnectionConfig> {
    let missing =
        |key: &str| MigrationError::configuration(config_name, format!("missing key '{}'", key));

    let database = non_empty(raw.database).ok_or_else(|| missing("Mongo.Database"))?;
    let host = non_empty(raw.host);
    let user = non_empty(raw.user);
    let password = non_empty(raw.password);
    let port = non_empty_value(raw.port);

    if let Some(connection_string) = non_empty(raw.custom_connection_string) {
        let mut conflicting = Vec::new();
        if host.is_some() {
            conflicting.push("Mongo.Host");
        }
        if port.is_some() {
            conflicting.push("Mongo.Port");
        }
        if user.is_some() {
            conflicting.push("Mongo.User");
        }
        if password.is_some() {
            conflicting.push("Mongo.Password");
        }
        if !conflicting.is_empty() {
            return Err(MigrationError::configuration(
                config_name,
                format!(
                    "'Mongo.CustomConnectionString' cannot be combined with {}",
                    conflicting.join(", ")
                ),
            ));
        }
        return Ok(ConnectionConfig::Custom {
            connection_string,
            database,
        });
    }

    let port = port.ok_or_else(|| missing("Mongo.Port"))?;
    let port = parse_port(&port).ok_or_else(|| {
        MigrationError::configuration(config_name, format!("invalid 'Mongo.Port' value {}", port))
    })?;

    Ok(ConnectionConfig::Discrete {
        host: host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port,
        user: user.ok_or_else(|| missing("Mongo.User"))?,
        password: password.ok_or_else(|| missing("Mongo.Password"))?,
        database,
    })
}

fn parse_port(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_discrete_configuration() {
        let config = parse_connection(
            "TagHistorian",
            r#"{"TagHistorian": {
                "Mongo.Port": 27018,
                "Mongo.User": "tags",
                "Mongo.Password": "pw",
                "Mongo.Database": "nitaghistorian",
                "Unrelated.Key": true
            }}"#,
        )
        .unwrap();

        assert_eq!(
            config,
            ConnectionConfig::Discrete {
                host: "localhost".into(),
                port: 27018,
                user: "tags".into(),
                password: "pw".into(),
                database: "nitaghistorian".into(),
            }
        );
    }

    #[test]
    fn test_custom_configuration_ignores_empty_discrete_keys() {
        let config = parse_connection(
            "UserData",
            r#"{"UserData": {
                "Mongo.CustomConnectionString": "mongodb://remote:27017/niuserdata",
                "Mongo.Host": "",
                "Mongo.Port": "",
                "Mongo.Database": "niuserdata"
            }}"#,
        )
        .unwrap();

        assert_eq!(
            config,
            ConnectionConfig::Custom {
                connection_string: "mongodb://remote:27017/niuserdata".into(),
                database: "niuserdata".into(),
            }
        );
    }

    #[test]
    fn test_contradictory_configuration_is_rejected() {
        let err = parse_connection(
            "UserData",
            r#"{"UserData": {
                "Mongo.CustomConnectionString": "mongodb://remote/niuserdata",
                "Mongo.Port": 27017,
                "Mongo.User": "u",
                "Mongo.Database": "niuserdata"
            }}"#,
        )
        .unwrap_err();

        assert!(err.is_configuration());
        let msg = err.to_string();
        assert!(msg.contains("Mongo.Port"));
        assert!(msg.contains("Mongo.User"));
    }

    #[test]
    fn test_missing_keys_are_named() {
        let err = parse_connection(
            "TestMonitor",
            r#"{"TestMonitor": {"Mongo.Port": "27017", "Mongo.User": "u", "Mongo.Database": "d"}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Mongo.Password"));

        let err = parse_connection("TestMonitor", r#"{"TestMonitor": {}}"#).unwrap_err();
        assert!(err.to_string().contains("Mongo.Database"));

        let err = parse_connection("TestMonitor", r#"{"Other": {}}"#).unwrap_err();
        assert!(err.to_string().contains("missing 'TestMonitor' section"));
    }

    #[test]
    fn test_empty_port_counts_as_missing() {
        let err = parse_connection(
            "Notification",
            r#"{"Notification": {"Mongo.Port": " ", "Mongo.User": "u",
                "Mongo.Password": "p", "Mongo.Database": "d"}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("missing key 'Mongo.Port'"));
    }

    #[test]
    fn test_invalid_port() {
        let err = parse_connection(
            "Notification",
            r#"{"Notification": {"Mongo.Port": 70000, "Mongo.User": "u",
                "Mongo.Password": "p", "Mongo.Database": "d"}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Mongo.Port"));
    }

    #[test]
    fn test_loader_reads_file_with_bom() {
        let tmp = TempDir::new().unwrap();
        let loader = ServiceConfigLoader::new(tmp.path());
        fs::write(
            loader.config_path("TagRuleEngine"),
            "\u{feff}{\"TagRuleEngine\": {\"Mongo.Port\": 27017, \"Mongo.User\": \"u\", \
             \"Mongo.Password\": \"p\", \"Mongo.Database\": \"nitagrule\"}}",
        )
        .unwrap();

        let config = loader.load_connection("TagRuleEngine").unwrap();
        assert_eq!(config.database(), "nitagrule");

        let err = loader.load_connection("Missing").unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("Missing.json"));
    }
}
