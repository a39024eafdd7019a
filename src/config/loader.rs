//! Configuration loading from disk.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::WorkerConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str, worker_id: u32) -> Result<WorkerConfig, ConfigError> {
    let config: WorkerConfig = toml::from_str(content)?;
    validate_config(&config, worker_id).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path, worker_id: u32) -> Result<WorkerConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content, worker_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
host = "www.example.com"
port = 9000

[session_store]
address = "127.0.0.1:6380"
auth = "hunter2"

[shutdown]
disconnect_grace_ms = 250
"#
        )
        .unwrap();

        let config = load_config(file.path(), 4).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.session_store.auth.as_deref(), Some("hunter2"));
        assert_eq!(config.shutdown.disconnect_grace_ms, 250);
        assert_eq!(config.shutdown.teardown_timeout_ms, 5000);
    }

    #[test]
    fn missing_host_is_a_validation_error() {
        let err = parse_config("port = 8080", 1).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("host must be set"));
    }

    #[test]
    fn syntax_error_is_a_parse_error() {
        let err = parse_config("host = ", 1).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/definitely/not/here.toml"), 1).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
