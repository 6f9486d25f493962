use std::io;
use std::result;

use thiserror::Error;

/// Custom result type for bdbkit operations
pub type Result<T> = result::Result<T, Error>;

/// Store, cursor, query and range-map errors
#[derive(Debug, Error)]
pub enum Error {
    /// Key/data pair already exists
    #[error("Key/data pair already exists")]
    KeyExist,
    /// No matching key/data pair found
    #[error("No matching key/data pair found")]
    NotFound,
    /// Lock request would close a cycle in the wait-for graph
    #[error("Transaction deadlock detected")]
    Deadlock,
    /// Lock was not granted within the configured timeout
    #[error("Lock wait timed out")]
    LockTimeout,
    /// Argument rejected before any mutation took place
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    /// Query tree used in a way its node kinds do not allow
    #[error("Malformed query: {0}")]
    MalformedQuery(String),
    /// Transaction is committed, aborted or otherwise unusable
    #[error("Transaction must abort, has finished, or is invalid")]
    BadTxn,
    /// Write attempted through a read-only handle
    #[error("Environment or database is read-only")]
    ReadOnly,
    /// Environment is closed
    #[error("Environment is closed")]
    EnvClosed,
    /// Database does not exist and CREATE was not given
    #[error("Database not found: {0}")]
    DbNotFound(String),
    /// Cursor is closed
    #[error("Cursor is closed")]
    CursorClosed,
    /// Database file is corrupted
    #[error("Database file is corrupted: {0}")]
    Corrupted(String),
    /// Database version mismatch
    #[error("Database version mismatch: found {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },
    /// Underlying file system failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// True when the caller should abort and retry the whole transaction.
    pub fn is_deadlock(&self) -> bool {
        matches!(self, Error::Deadlock)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }

    pub(crate) fn invalid<S: Into<String>>(msg: S) -> Error {
        Error::InvalidValue(msg.into())
    }
}

/// Expected, non-exceptional outcome of a store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Operation succeeded
    Ok,
    /// No record at the requested position, or end of data
    NotFound,
    /// Key already present and duplicates are not allowed
    KeyDup,
}

impl Status {
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}
