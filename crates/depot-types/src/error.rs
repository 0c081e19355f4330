use std::fmt;

use thiserror::Error;

/// The kind of failure an operation reports, independent of the concrete
/// error type that carries it.
///
/// Storage, channel and integration errors each map every variant onto
/// exactly one kind, so a transport layer can translate failures without
/// matching on crate-specific enums.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input.
    BadRequest,
    /// Create on an id that already exists.
    Conflict,
    /// Operation on an absent id or payload.
    NotFound,
    /// Surfaced by an authentication collaborator.
    Unauthorized,
    /// Surfaced by an access-control collaborator.
    Forbidden,
    /// I/O, serialization or messaging failure.
    InternalError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BadRequest => "BadRequest",
            Self::Conflict => "Conflict",
            Self::NotFound => "NotFound",
            Self::Unauthorized => "Unauthorized",
            Self::Forbidden => "Forbidden",
            Self::InternalError => "InternalError",
        };
        write!(f, "{s}")
    }
}

/// Errors produced while converting model types to and from their exchange
/// representation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("object id must not be empty")]
    EmptyId,
}

impl TypeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Serialization(_) => ErrorKind::InternalError,
            Self::EmptyId => ErrorKind::BadRequest,
        }
    }
}
