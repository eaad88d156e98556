//! Error taxonomy for trajectory runs

use thiserror::Error;

/// Everything that can make a run fail. A failed run never yields a partial
/// trajectory.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BeamError {
    /// Invalid static configuration (electrode gap, sample count, solver settings)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Run parameters outside the model's validity domain
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The solver diverged or gave up
    #[error("numerical error: {0}")]
    Numerical(String),
}

pub type Result<T> = std::result::Result<T, BeamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = BeamError::InvalidInput("voltage must be positive, got -5".into());
        assert_eq!(err.to_string(), "invalid input: voltage must be positive, got -5");

        let err = BeamError::Configuration("electrode gap must be positive".into());
        assert!(err.to_string().starts_with("configuration error"));
    }
}
