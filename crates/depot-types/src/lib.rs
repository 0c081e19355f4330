//! Foundation types for the depot object repository.
//!
//! Every other depot crate depends on `depot-types`. The types here describe
//! what is stored, never how: the storage and replication layers treat
//! `content`, `acl` and `user_metadata` as opaque documents.
//!
//! # Key Types
//!
//! - [`StoredObject`] -- a record with opaque content, ACLs, metadata and payload descriptors
//! - [`Payload`] -- a named binary attachment descriptor
//! - [`PayloadSource`] -- the transient byte stream supplied while writing a payload
//! - [`ErrorKind`] -- the error taxonomy shared by every depot error type

pub mod error;
pub mod object;

pub use error::{ErrorKind, TypeError};
pub use object::{AccessControlList, Metadata, Payload, PayloadSource, StoredObject};
