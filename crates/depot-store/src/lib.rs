//! Object storage for the depot repository.
//!
//! A store persists [`StoredObject`] records together with named payload
//! byte streams. Backends implement the [`ObjectStore`] trait and are chosen
//! once, from [`StoreConfig`], when the store is opened:
//!
//! - [`DurableStore`] -- SQLite records plus a hash-sharded payload tree
//! - [`MemoryStore`] -- concurrent maps for tests and embedding
//!
//! [`TracedStore`] wraps either backend and reports per-operation latency.
//!
//! # Design Rules
//!
//! 1. Payload bytes are written before the record that lists them.
//! 2. `create` and `update` return the copy re-read from the backend.
//! 3. The payload directory of an object is a pure function of its id.
//! 4. Deleting an object prunes every shard directory it leaves empty.
//! 5. Listings are lazy cursors with a size snapshot taken when opened.
//!
//! [`StoredObject`]: depot_types::StoredObject

pub mod config;
pub mod cursor;
pub mod durable;
pub mod error;
pub mod layout;
pub mod memory;
pub mod range;
pub mod traced;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use config::{open_store, StorageBackend, StoreConfig};
pub use cursor::ResultCursor;
pub use durable::DurableStore;
pub use error::{StoreError, StoreResult};
pub use layout::{escape_file_name, HashAlgorithm, ShardHash, ShardLayout, ShardLayoutConfig};
pub use memory::MemoryStore;
pub use range::ByteRange;
pub use traced::{timed, TracedStore};
pub use traits::{ObjectStore, PayloadReader};
