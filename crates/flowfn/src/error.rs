use thiserror::Error;

/// Failure taxonomy shared by every fallible entry point of the runtime.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// An unknown function name, op name, or unregistered handle.
    #[error("not found: {0}")]
    NotFound(String),
    /// A declared/actual type mismatch, a missing required attribute, or a
    /// gradient request for an op with no registered gradient.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A broken structural invariant, e.g. executing without a call frame.
    #[error("internal: {0}")]
    Internal(String),
    /// Cooperative cancellation observed before dispatch.
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
