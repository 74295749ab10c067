use serde_derive::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Result returning Error
pub type Result<T> = std::result::Result<T, Error>;

/// atproxy errors. All except Internal are considered user-facing.
///
/// LockConflict is the only kind handled locally (by the bounded retry loop);
/// every other kind is returned to the proxy, which fails the statement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// The statement's cancellation token fired.
    Cancelled,
    /// The statement's deadline passed while waiting.
    DeadlineExceeded,
    Config(String),
    Internal(String),
    Value(String),
    Serialization(String),
    /// State carried from pre-handle to post-handle is missing.
    MissingContextState(String),
    /// No schema is selected for the statement.
    MissingSchema,
    /// Reading the before/after image from the backend failed.
    ImageCapture(String),
    /// The coordinator reports the rows are locked by another branch.
    LockConflict(String),
    /// Any other coordinator failure.
    Registration(String),
    /// The undo log store rejected the record.
    UndoLog(String),
}

impl Error {
    /// Returns true if the error may be resolved by waiting and retrying.
    pub fn is_lock_conflict(&self) -> bool {
        matches!(self, Error::LockConflict(_))
    }
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Cancelled => write!(f, "Statement cancelled"),
            Error::DeadlineExceeded => write!(f, "Statement deadline exceeded"),
            Error::Config(s) | Error::Internal(s) | Error::Value(s) => write!(f, "{}", s),
            Error::Serialization(s) => write!(f, "Serialization failed: {}", s),
            Error::MissingContextState(s) => write!(f, "Missing statement state: {}", s),
            Error::MissingSchema => write!(f, "Schema name should not be empty"),
            Error::ImageCapture(s) => write!(f, "Image capture failed: {}", s),
            Error::LockConflict(s) => write!(f, "Lock wait timeout: {}", s),
            Error::Registration(s) => write!(f, "Branch register failed: {}", s),
            Error::UndoLog(s) => write!(f, "Undo log insert failed: {}", s),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for Error {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<std::num::ParseFloatError> for Error {
    fn from(err: std::num::ParseFloatError) -> Self {
        Error::Value(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Internal(err.to_string())
    }
}
