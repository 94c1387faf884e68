use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] autogen_core::errors::ConfigError),

    #[error(transparent)]
    Client(#[from] autogen_client::error::ClientError),

    #[error(transparent)]
    Manager(#[from] autogen_manager::error::ManagerError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{count} job(s) drifted from their records; rerun with --reset to start them over")]
    Drift { count: usize },

    #[error("{count} job(s) could not advance; see the log for details")]
    TickFailed { count: usize },
}
