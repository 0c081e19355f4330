use std::io;

use depot_types::{ErrorKind, TypeError};

/// Errors from object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The request is malformed (empty id, unusable layout parameters).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// `create` on an id that already exists.
    #[error("object already exists: {0}")]
    Conflict(String),

    /// The object does not exist.
    #[error("object does not exist: {0}")]
    NotFound(String),

    /// Raised by an authentication collaborator, never by a backend.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Raised by an access-control collaborator, never by a backend.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// I/O error from the payload area.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Writing a payload's bytes failed.
    #[error("error writing payload {name} of {id}: {source}")]
    PayloadWrite {
        id: String,
        name: String,
        #[source]
        source: io::Error,
    },

    /// Error from the metadata database.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization or deserialization of a stored record failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store has been closed.
    #[error("store is closed")]
    Closed,

    /// Any other internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// The taxonomy kind this error reports.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Io(_)
            | Self::PayloadWrite { .. }
            | Self::Database(_)
            | Self::Serialization(_)
            | Self::Closed
            | Self::Internal(_) => ErrorKind::InternalError,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<TypeError> for StoreError {
    fn from(err: TypeError) -> Self {
        match err {
            TypeError::EmptyId => Self::BadRequest(err.to_string()),
            TypeError::Serialization(msg) => Self::Internal(msg),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
