//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::ServerConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Parse error in {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid configuration: {0}")]
    Schema(#[source] toml::de::Error),
    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a single TOML file.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    load_layered(&[path.to_path_buf()])
}

/// Load configuration from several TOML files.
///
/// Later files override earlier ones table by table; arrays and scalars are
/// replaced whole. With no paths the defaults are returned (still validated).
pub fn load_layered(paths: &[PathBuf]) -> Result<ServerConfig, ConfigError> {
    let mut merged = toml::Table::new();
    for path in paths {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let table: toml::Table = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = ?path, "Config layer loaded");
        merge_tables(&mut merged, table);
    }

    let config: ServerConfig = toml::Value::Table(merged)
        .try_into()
        .map_err(ConfigError::Schema)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
