use std::fmt;
use std::io::{self, Cursor, Read};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TypeError;

// ---------------------------------------------------------------------------
// PayloadSource
// ---------------------------------------------------------------------------

/// Transient byte stream supplying a payload's content during a single
/// `create` or `update` call.
///
/// Sources are never serialized and never cloned. A store consumes the
/// source while writing and leaves the payload descriptor without one.
pub struct PayloadSource(Box<dyn Read + Send>);

impl PayloadSource {
    /// Wrap any reader as a payload source.
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self(Box::new(reader))
    }

    /// A source over an in-memory buffer.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(Cursor::new(bytes.into()))
    }

    /// Unwrap into the boxed reader.
    pub fn into_reader(self) -> Box<dyn Read + Send> {
        self.0
    }
}

impl Read for PayloadSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl fmt::Debug for PayloadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PayloadSource(..)")
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// A named binary attachment belonging to one object.
///
/// Only the descriptor is part of the object's stored representation. The
/// bytes live in the store's payload area and are reached through
/// `get_payload`. `size` is computed by the store on write; whatever the
/// caller puts there is overwritten.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    /// Unique within the owning object.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(skip)]
    source: Option<PayloadSource>,
}

impl Payload {
    /// A descriptor with no filename, media type or source.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filename: None,
            media_type: None,
            size: 0,
            source: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    pub fn with_source(mut self, source: PayloadSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn set_source(&mut self, source: PayloadSource) {
        self.source = Some(source);
    }

    /// Remove and return the transient source, leaving `None` behind.
    pub fn take_source(&mut self) -> Option<PayloadSource> {
        self.source.take()
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }
}

/// Cloning copies the descriptor only; the transient source stays with the
/// original.
impl Clone for Payload {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            filename: self.filename.clone(),
            media_type: self.media_type.clone(),
            size: self.size,
            source: None,
        }
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.filename == other.filename
            && self.media_type == other.media_type
            && self.size == other.size
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("name", &self.name)
            .field("filename", &self.filename)
            .field("media_type", &self.media_type)
            .field("size", &self.size)
            .field("has_source", &self.source.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ACL and metadata
// ---------------------------------------------------------------------------

/// Reader and writer identifier lists. Opaque to the storage core.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControlList {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writers: Option<Vec<String>>,
}

/// Creation and modification stamps plus optional version lineage.
///
/// Timestamps are milliseconds since the UNIX epoch.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashes: Option<Value>,
    #[serde(default)]
    pub created_on: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default)]
    pub modified_on: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_version: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_of: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_on: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txn_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_metadata: Option<Value>,
}

impl Metadata {
    /// Metadata for a freshly created object: created and modified stamps
    /// are both set to `at`.
    pub fn created(actor: Option<&str>, at: DateTime<Utc>) -> Self {
        let ms = at.timestamp_millis();
        Self {
            created_on: ms,
            created_by: actor.map(str::to_string),
            modified_on: ms,
            modified_by: actor.map(str::to_string),
            ..Self::default()
        }
    }

    /// Record a modification by `actor` at `at`.
    pub fn touch(&mut self, actor: Option<&str>, at: DateTime<Utc>) {
        self.modified_on = at.timestamp_millis();
        self.modified_by = actor.map(str::to_string);
    }
}

// ---------------------------------------------------------------------------
// StoredObject
// ---------------------------------------------------------------------------

/// A structured record identified by a unique, externally assigned id.
///
/// The exchange representation is JSON with camelCase field names. Payload
/// bytes are never part of it; only the ordered list of descriptors is.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    pub id: String,
    #[serde(rename = "type")]
    pub object_type: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acl: Option<AccessControlList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payloads: Option<Vec<Payload>>,
    /// Payload names staged for deletion by the next `update`.
    #[serde(skip)]
    payloads_to_delete: Vec<String>,
}

impl StoredObject {
    pub fn new(id: impl Into<String>, object_type: impl Into<String>, content: Value) -> Self {
        Self {
            id: id.into(),
            object_type: object_type.into(),
            content,
            ..Self::default()
        }
    }

    /// Attach a payload, replacing any existing descriptor with the same name.
    pub fn add_payload(&mut self, payload: Payload) {
        let payloads = self.payloads.get_or_insert_with(Vec::new);
        match payloads.iter_mut().find(|p| p.name == payload.name) {
            Some(existing) => *existing = payload,
            None => payloads.push(payload),
        }
    }

    /// Stage a payload for deletion and drop its descriptor.
    pub fn delete_payload(&mut self, name: &str) {
        self.payloads_to_delete.push(name.to_string());
        if let Some(payloads) = self.payloads.as_mut() {
            payloads.retain(|p| p.name != name);
        }
        self.normalize_payloads();
    }

    /// Look up a payload descriptor by name.
    pub fn payload(&self, name: &str) -> Option<&Payload> {
        self.payloads.as_ref()?.iter().find(|p| p.name == name)
    }

    /// Names of every payload descriptor, in order.
    pub fn payload_names(&self) -> impl Iterator<Item = &str> {
        self.payloads.iter().flatten().map(|p| p.name.as_str())
    }

    pub fn payloads_to_delete(&self) -> &[String] {
        &self.payloads_to_delete
    }

    /// Remove and return the staged deletions, leaving the list empty.
    pub fn take_payloads_to_delete(&mut self) -> Vec<String> {
        std::mem::take(&mut self.payloads_to_delete)
    }

    /// Collapse an empty payload list to `None`.
    pub fn normalize_payloads(&mut self) {
        if self.payloads.as_ref().is_some_and(Vec::is_empty) {
            self.payloads = None;
        }
    }

    /// Returns an error if the object cannot be stored under its id.
    pub fn validate_id(&self) -> Result<(), TypeError> {
        if self.id.is_empty() {
            return Err(TypeError::EmptyId);
        }
        Ok(())
    }

    /// Serialize to the JSON exchange representation.
    pub fn to_json(&self) -> Result<String, TypeError> {
        serde_json::to_string(self).map_err(|e| TypeError::Serialization(e.to_string()))
    }

    /// Parse the JSON exchange representation.
    pub fn from_json(json: &str) -> Result<Self, TypeError> {
        serde_json::from_str(json).map_err(|e| TypeError::Serialization(e.to_string()))
    }
}
