/*!
 * Error Types
 * Umbrella error over every subsystem, with miette diagnostics
 */

use miette::Diagnostic;
use thiserror::Error;

pub use crate::core::config::ConfigError;
pub use crate::grate::{DispatchError, ProvenanceError};
pub use crate::interpose::{JournalError, RegistrationError};
pub use crate::process::ProcessError;
pub use crate::signals::GateError;

/// Library-wide result
pub type LindResult<T> = Result<T, LindError>;

#[derive(Error, Debug, Diagnostic)]
pub enum LindError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Provenance(#[from] ProvenanceError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Journal(#[from] JournalError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Process(#[from] ProcessError),

    #[error("async runtime could not start: {0}")]
    #[diagnostic(code(lind::runtime))]
    Runtime(#[source] std::io::Error),
}

impl LindError {
    /// Exit status a binary should report for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Process(e) if e.is_leaf() => 127,
            Self::Config(_) => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_conversions_keep_diagnostic_code() {
        let err: LindError = ConfigError::Zero("LIND_MAX_CHAIN_DEPTH").into();
        assert_eq!(err.exit_code(), 2);
        assert_eq!(
            err.code().map(|c| c.to_string()),
            Some("config::zero".to_string())
        );

        let err: LindError = ProcessError::UnevenChain(3).into();
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("3 names"));
    }
}
