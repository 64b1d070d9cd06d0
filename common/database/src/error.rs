use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::manager::ConnectionState;

/// Failure to obtain credentials from a [`CredentialSource`](crate::CredentialSource).
///
/// Variants carry the path, field names and positions only. Nothing read from the
/// secret document ever ends up in a message.
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("secret file {} does not exist", path.display())]
    NotFound { path: PathBuf },

    #[error("secret file {} could not be read: {kind}", path.display())]
    Unreadable { path: PathBuf, kind: io::ErrorKind },

    #[error("secret file {} is malformed: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("secret file {} is missing required field `{field}`", path.display())]
    MissingField { path: PathBuf, field: &'static str },

    #[error("secret file {} has an invalid `{field}` field, expected {expected}", path.display())]
    InvalidField {
        path: PathBuf,
        field: &'static str,
        expected: &'static str,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("database connection is not initialized")]
    NotInitialized,

    #[error("database connection is closed")]
    Closed,

    #[error("database connect was already attempted, connection is {0}")]
    AlreadyAttempted(ConnectionState),

    #[error("timed out connecting to database after {0:?}")]
    Timeout(Duration),

    #[error("database connection refused: {0}")]
    Refused(String),

    #[error("invalid database connection settings: {0}")]
    InvalidSettings(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DisconnectError {
    #[error("timed out disconnecting from database after {0:?}")]
    Timeout(Duration),

    #[error("failed to close database connection: {0}")]
    Close(String),
}
