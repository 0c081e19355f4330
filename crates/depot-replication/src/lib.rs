//! Change-event replication for depot.
//!
//! Every accepted mutation of a [`ReplicatedStore`] produces one
//! [`ChangeEvent`] that is handed to a [`ReplicationChannel`], keyed by the
//! object id. Channels available:
//!
//! - [`LogChannel`] -- one topic of a partitioned append-only log
//! - [`FanoutChannel`] -- several channels at once, all must accept
//! - [`TracedChannel`] -- latency reporting around any channel
//!
//! Receiving clusters decode events with [`ChangeEvent::from_json`] and
//! apply them to their own store with [`ChangeEvent::apply_to`].
//!
//! # Design Rules
//!
//! 1. The store write happens before the event is sent, and is never undone.
//! 2. Events of one object share a key, so a partitioned log keeps their order.
//! 3. A send failure after a successful write is a replication failure,
//!    distinct from store failures.
//! 4. Sends return a [`SendHandle`]; blocking sends are built on top of it.

pub mod channel;
pub mod config;
pub mod error;
pub mod event;
pub mod fanout;
pub mod log;
pub mod log_channel;
pub mod replicated;
pub mod traced;

// Re-export primary types at crate root for ergonomic imports.
pub use channel::{ReplicationChannel, SendHandle};
pub use config::{DepotConfig, ReplicationConfig};
pub use error::{ChannelError, ChannelResult, ReplicationError, ReplicationResult};
pub use event::{Applied, ChangeEvent, ChangeKind, ReplicatedObject};
pub use fanout::{Durability, FanoutChannel};
pub use log::{
    partition_for, read_partition, segment_path, Acks, FileLogProducer, LogProducer, LogRecord,
    DEFAULT_PARTITIONS,
};
pub use log_channel::{topic_for, LogChannel, LogChannelConfig, TOPIC_PREFIX};
pub use replicated::ReplicatedStore;
pub use traced::TracedChannel;
