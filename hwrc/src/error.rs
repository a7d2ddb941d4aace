use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RcError {
    #[error("null argument")]
    NullArgument,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("memory allocation failed")]
    MemoryError,
    #[error("invalid status: {0}")]
    InvalidStatus(&'static str),
    #[error("{0}")]
    Error(String),
}

impl RcError {
    /// Return code used by the hardware encoder API. Success is 0.
    pub fn code(&self) -> i32 {
        match self {
            RcError::Error(_) => -1,
            RcError::NullArgument => -2,
            RcError::InvalidArgument(_) => -3,
            RcError::MemoryError => -4,
            RcError::InvalidStatus(_) => -7,
        }
    }
}

pub type Result<T> = std::result::Result<T, RcError>;
