use std::collections::HashSet;
use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.scan.workers == 0 || config.convert.workers == 0 {
        return Err(ConfigError::Validation {
            message: "Worker counts must be greater than zero".to_string(),
        });
    }

    if config.convert.chunk_rows == 0 {
        return Err(ConfigError::Validation {
            message: "convert.chunk_rows must be greater than zero".to_string(),
        });
    }

    if config.expected_schedules.is_empty() {
        return Err(ConfigError::Validation {
            message: "expected_schedules must not be empty".to_string(),
        });
    }

    let mut seen = HashSet::new();
    for code in &config.expected_schedules {
        let valid = !code.is_empty()
            && code
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
        if !valid {
            return Err(ConfigError::Validation {
                message: format!("Invalid schedule code in expected_schedules: '{}'", code),
            });
        }
        if !seen.insert(code) {
            return Err(ConfigError::Validation {
                message: format!("Duplicate schedule code in expected_schedules: '{}'", code),
            });
        }
    }

    Ok(())
}
