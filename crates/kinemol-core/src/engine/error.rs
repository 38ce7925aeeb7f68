use crate::core::io::hessian::HessianFileError;
use crate::core::io::xyz::XyzError;
use crate::core::models::system::SystemError;
use crate::core::potentials::PotentialError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Backend error: {source}")]
    Potential {
        #[from]
        source: PotentialError,
    },

    #[error("Numerical failure: {0}")]
    Numerical(String),

    #[error("Constraint solver did not converge within {iterations} iterations")]
    Constraint { iterations: usize },

    #[error("Restart file error: {0}")]
    Restart(String),

    #[error("System error: {source}")]
    System {
        #[from]
        source: SystemError,
    },

    #[error("Trajectory I/O failed: {source}")]
    Trajectory {
        #[from]
        source: XyzError,
    },

    #[error("Hessian file error: {source}")]
    HessianFile {
        #[from]
        source: HessianFileError,
    },

    #[error("File I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Internal logic error: {0}")]
    Internal(String),
}

impl EngineError {
    /// True for failures the MD rescue path may recover from; NaN and other
    /// hard numerical states abort the run instead.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::Potential {
                source: PotentialError::Convergence { .. }
            } | EngineError::Constraint { .. }
        )
    }
}
