use std::io;

use depot_store::StoreError;
use depot_types::ErrorKind;

/// Errors produced by replication channels and log producers.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// A blocking send failed; the cause is the underlying channel failure.
    #[error("replication send failed: {0}")]
    SendFailed(#[source] Box<ChannelError>),

    /// The channel or producer has been shut down.
    #[error("channel is shut down")]
    Shutdown,

    /// The completion side of a send went away before reporting a result.
    #[error("send abandoned before completion")]
    Abandoned,

    /// The declared durability policy cannot be honoured.
    #[error("unsupported durability policy: {0}")]
    UnsupportedDurability(String),

    /// Invalid client configuration.
    #[error("invalid channel configuration: {0}")]
    Config(String),

    /// A change event could not be assembled.
    #[error("could not build change event: {0}")]
    Message(String),

    /// A partition worker thread panicked.
    #[error("log partition worker panicked")]
    WorkerPanicked,

    /// I/O error while appending to or reading the log.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Record encoding or decoding failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ChannelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedDurability(_) | Self::Config(_) => ErrorKind::BadRequest,
            Self::SendFailed(_)
            | Self::Shutdown
            | Self::Abandoned
            | Self::Message(_)
            | Self::WorkerPanicked
            | Self::Io(_)
            | Self::Serialization(_) => ErrorKind::InternalError,
        }
    }
}

/// Convenience alias used throughout the channel modules.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Errors from replicated store operations and change-event handling.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    /// The store operation itself failed; nothing was replicated.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The store operation succeeded but its change event was not accepted.
    #[error("replication of {handle} failed: {source}")]
    Replication {
        handle: String,
        #[source]
        source: ChannelError,
    },

    /// Channel construction failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// A change event is malformed.
    #[error("invalid change event: {0}")]
    Event(String),

    /// A change event could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The configuration file could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ReplicationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(e) => e.kind(),
            Self::Channel(e) => e.kind(),
            Self::Event(_) | Self::Config(_) => ErrorKind::BadRequest,
            Self::Replication { .. } | Self::Serialization(_) => ErrorKind::InternalError,
        }
    }

    /// Returns `true` if the store mutation happened and only its
    /// replication failed.
    pub fn is_replication_failure(&self) -> bool {
        matches!(self, Self::Replication { .. })
    }
}

pub type ReplicationResult<T> = Result<T, ReplicationError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn send_failure_keeps_cause() {
        let err = ChannelError::SendFailed(Box::new(ChannelError::Abandoned));
        assert_eq!(err.kind(), ErrorKind::InternalError);
        assert_eq!(err.source().unwrap().to_string(), "send abandoned before completion");
    }

    #[test]
    fn store_kinds_pass_through() {
        let err = ReplicationError::from(StoreError::Conflict("x".into()));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(!err.is_replication_failure());
    }

    #[test]
    fn replication_failure_is_internal() {
        let err = ReplicationError::Replication {
            handle: "x".into(),
            source: ChannelError::Shutdown,
        };
        assert_eq!(err.kind(), ErrorKind::InternalError);
        assert!(err.is_replication_failure());
        assert!(err.to_string().contains("x"));
    }

    #[test]
    fn config_errors_are_bad_requests() {
        assert_eq!(ChannelError::Config("acks".into()).kind(), ErrorKind::BadRequest);
        assert_eq!(
            ChannelError::UnsupportedDurability("ONE".into()).kind(),
            ErrorKind::BadRequest
        );
    }
}
