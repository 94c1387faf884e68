use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error(transparent)]
    Config(#[from] autogen_core::errors::ConfigError),

    #[error(transparent)]
    Client(#[from] autogen_client::error::ClientError),

    #[error(transparent)]
    Drift(#[from] autogen_core::errors::DriftError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("Record '{path}' is unreadable: {source}")]
    Record {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to parse plan '{path}': {source}")]
    Plan {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("{task}: input '{input}' refers to '{upstream}', which is not an earlier stage of job '{job}'.")]
    UnknownUpstream {
        job: String,
        task: String,
        input: String,
        upstream: String,
    },

    #[error("{task} finished but did not produce artifact '{artifact}'.")]
    MissingArtifact { task: String, artifact: String },

    #[error("{task}: {message}")]
    Program { task: String, message: String },
}

impl ManagerError {
    pub fn is_drift(&self) -> bool {
        matches!(self, ManagerError::Drift(_))
    }
}

pub type Result<T> = std::result::Result<T, ManagerError>;
