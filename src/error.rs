//! Error taxonomy. Adapter and persistence failures are caught and
//! swallowed by the control loop; only [`AtscError::LoopInvariantViolation`]
//! is fatal. Control-interface errors are the narrower [`ControlError`] and
//! are returned synchronously without mutating state.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AtscError {
    #[error("adapter communication failure: {0}")]
    AdapterCommFailure(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("loop invariant violation: {0}")]
    LoopInvariantViolation(String),

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
}

/// Errors returned synchronously to control-interface callers. Never
/// mutates loop state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

impl From<ControlError> for AtscError {
    fn from(e: ControlError) -> Self {
        match e {
            ControlError::InvalidCommand(m) => AtscError::InvalidCommand(m),
            ControlError::ConstraintViolation(m) => AtscError::ConstraintViolation(m),
        }
    }
}
