use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    General(String),

    #[error("Could not determine HOME directory.")]
    HomeDirectoryNotFound,

    #[error("Configuration file not found at '{0}'.")]
    ConfigNotFound(PathBuf),

    #[error("Failed to expand path '{path}': {reason}")]
    PathExpansion { path: String, reason: String },
}

/// A persisted field whose value differs from the plan and may not be changed.
#[derive(Debug, Clone, PartialEq)]
pub struct RefusedField {
    pub field: String,
    pub recorded: Value,
    pub planned: Value,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriftError {
    #[error("{owner}: plan changed accuracy-affecting field(s) of an existing record: {}. Re-run with --reset to discard the record.", describe_fields(.fields))]
    Fields {
        owner: String,
        fields: Vec<RefusedField>,
    },

    #[error("{owner}: plan defines stages [{}] but the record holds [{}]. Re-run with --reset to discard the record.", .planned.join(", "), .recorded.join(", "))]
    Stages {
        owner: String,
        recorded: Vec<String>,
        planned: Vec<String>,
    },
}

impl DriftError {
    pub fn owner(&self) -> &str {
        match self {
            DriftError::Fields { owner, .. } | DriftError::Stages { owner, .. } => owner,
        }
    }
}

fn describe_fields(fields: &[RefusedField]) -> String {
    fields
        .iter()
        .map(|f| format!("'{}' ({} -> {})", f.field, f.recorded, f.planned))
        .collect::<Vec<_>>()
        .join(", ")
}
