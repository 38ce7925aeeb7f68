use kinemol_core::core::io::xyz::XyzError;
use kinemol_core::engine::error::EngineError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read structure: {0}")]
    Structure(#[from] XyzError),

    #[error("Configuration file is not valid JSON: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl CliError {
    /// Process exit code: backend-availability and numerical failures exit
    /// non-zero, everything user-facing gets a distinct code.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Io(_) | CliError::Structure(_) | CliError::ConfigParse(_) => 2,
            CliError::Engine(_) => 1,
        }
    }
}
