use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] autogen_core::errors::ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command '{command}' failed on the {backend} backend: {stderr}")]
    CommandFailed {
        backend: String,
        command: String,
        stderr: String,
    },

    #[error("Failed to parse a {backend} job ID from output: {output}")]
    JobIdParse { backend: String, output: String },

    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, ClientError>;
