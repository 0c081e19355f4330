use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use depot_store::{ObjectStore, StoreError};
use depot_types::{Payload, PayloadSource, StoredObject};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ReplicationError, ReplicationResult};

/// What happened to the object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Update,
    Delete,
}

/// The object snapshot carried by an UPDATE event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplicatedObject {
    #[serde(rename = "cordraObject")]
    pub object: StoredObject,
    /// Payload bytes by name, base64 encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payloads: Option<BTreeMap<String, String>>,
}

/// One accepted store mutation, as published on a replication channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "cordraClusterId")]
    pub cluster_id: String,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    /// Id of the object concerned.
    pub handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<ReplicatedObject>,
}

/// What applying an event did to the local store.
#[derive(Clone, Debug, PartialEq)]
pub enum Applied {
    /// The event came from this cluster.
    Ignored,
    Created(StoredObject),
    Updated(StoredObject),
    Deleted,
    /// A DELETE for an object that was not there.
    AlreadyAbsent,
}

impl ChangeEvent {
    pub fn update(cluster_id: impl Into<String>, object: StoredObject) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            kind: ChangeKind::Update,
            handle: object.id.clone(),
            object: Some(ReplicatedObject {
                object,
                payloads: None,
            }),
        }
    }

    pub fn delete(cluster_id: impl Into<String>, handle: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            kind: ChangeKind::Delete,
            handle: handle.into(),
            object: None,
        }
    }

    /// Embed one payload's bytes. Ignored on DELETE events.
    pub fn add_payload_bytes(&mut self, name: impl Into<String>, bytes: &[u8]) {
        if let Some(object) = self.object.as_mut() {
            object
                .payloads
                .get_or_insert_with(BTreeMap::new)
                .insert(name.into(), STANDARD.encode(bytes));
        }
    }

    /// Decoded bytes of an embedded payload.
    pub fn payload_bytes(&self, name: &str) -> ReplicationResult<Option<Vec<u8>>> {
        let encoded = self
            .object
            .as_ref()
            .and_then(|o| o.payloads.as_ref())
            .and_then(|p| p.get(name));
        match encoded {
            Some(encoded) => STANDARD
                .decode(encoded)
                .map(Some)
                .map_err(|e| ReplicationError::Event(format!("payload {name}: {e}"))),
            None => Ok(None),
        }
    }

    pub fn to_json(&self) -> ReplicationResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> ReplicationResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Apply an event received from another cluster to `store`.
    ///
    /// Events from `local_cluster_id` are ignored. An UPDATE creates the
    /// object when it is absent and replaces it otherwise; payloads the
    /// snapshot no longer lists are removed.
    pub fn apply_to<S>(self, store: &S, local_cluster_id: &str) -> ReplicationResult<Applied>
    where
        S: ObjectStore + ?Sized,
    {
        if self.cluster_id == local_cluster_id {
            return Ok(Applied::Ignored);
        }

        match self.kind {
            ChangeKind::Delete => match store.delete(&self.handle) {
                Ok(()) => {
                    debug!(handle = %self.handle, "replicated delete applied");
                    Ok(Applied::Deleted)
                }
                Err(StoreError::NotFound(_)) => Ok(Applied::AlreadyAbsent),
                Err(e) => Err(e.into()),
            },
            ChangeKind::Update => {
                let object = self.into_object()?;
                let id = object.id.clone();
                let applied = match store.get(&id) {
                    Ok(existing) => Applied::Updated(store.update(stage_removed(object, &existing))?),
                    Err(StoreError::NotFound(_)) => Applied::Created(store.create(object)?),
                    Err(e) => return Err(e.into()),
                };
                debug!(handle = %id, "replicated update applied");
                Ok(applied)
            }
        }
    }

    /// The snapshot with embedded bytes attached as payload sources.
    fn into_object(self) -> ReplicationResult<StoredObject> {
        let ReplicatedObject {
            mut object,
            payloads,
        } = self
            .object
            .ok_or_else(|| ReplicationError::Event(format!("UPDATE of {} has no object", self.handle)))?;
        if object.id != self.handle {
            return Err(ReplicationError::Event(format!(
                "handle {} does not match object id {}",
                self.handle, object.id
            )));
        }

        for (name, encoded) in payloads.unwrap_or_default() {
            let bytes = STANDARD
                .decode(&encoded)
                .map_err(|e| ReplicationError::Event(format!("payload {name}: {e}")))?;
            let source = PayloadSource::from_bytes(bytes);
            let listed = object.payloads.iter_mut().flatten().find(|p| p.name == name);
            match listed {
                Some(payload) => payload.set_source(source),
                None => object.add_payload(Payload::new(name).with_source(source)),
            }
        }
        Ok(object)
    }
}

/// Stage deletion of every payload `existing` has that `incoming` dropped.
fn stage_removed(mut incoming: StoredObject, existing: &StoredObject) -> StoredObject {
    let dropped: Vec<String> = existing
        .payload_names()
        .filter(|name| incoming.payload(name).is_none())
        .map(str::to_string)
        .collect();
    for name in dropped {
        incoming.delete_payload(&name);
    }
    incoming
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_store::MemoryStore;
    use serde_json::{json, Value};
    use std::io::Read;

    fn object_with_payload(id: &str, name: &str, bytes: &[u8]) -> StoredObject {
        let mut obj = StoredObject::new(id, "Document", json!({"id": id}));
        obj.add_payload(
            Payload::new(name).with_source(PayloadSource::from_bytes(bytes.to_vec())),
        );
        obj
    }

    fn read(store: &MemoryStore, id: &str, name: &str) -> Option<Vec<u8>> {
        store.get_payload(id, name).unwrap().map(|mut r| {
            let mut buf = Vec::new();
            r.read_to_end(&mut buf).unwrap();
            buf
        })
    }

    // -----------------------------------------------------------------------
    // Wire shape
    // -----------------------------------------------------------------------

    #[test]
    fn update_wire_shape() {
        let mut event = ChangeEvent::update("east", StoredObject::new("a/1", "Document", json!({"x": 1})));
        event.add_payload_bytes("p", b"hi");

        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["cordraClusterId"], "east");
        assert_eq!(value["type"], "UPDATE");
        assert_eq!(value["handle"], "a/1");
        assert_eq!(value["object"]["cordraObject"]["id"], "a/1");
        assert_eq!(value["object"]["cordraObject"]["content"], json!({"x": 1}));
        assert_eq!(value["object"]["payloads"]["p"], "aGk=");
    }

    #[test]
    fn delete_wire_shape() {
        let json = ChangeEvent::delete("east", "a/1").to_json().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "DELETE");
        assert!(value.get("object").is_none());
        assert_eq!(ChangeEvent::from_json(&json).unwrap(), ChangeEvent::delete("east", "a/1"));
    }

    #[test]
    fn payloads_omitted_unless_embedded() {
        let event = ChangeEvent::update("east", StoredObject::new("a", "T", json!({})));
        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert!(value["object"].get("payloads").is_none());
        assert_eq!(event.payload_bytes("p").unwrap(), None);
    }

    #[test]
    fn malformed_events_are_rejected() {
        assert!(ChangeEvent::from_json("{\"type\":\"RENAME\"}").is_err());

        let missing = ChangeEvent {
            cluster_id: "west".into(),
            kind: ChangeKind::Update,
            handle: "a".into(),
            object: None,
        };
        let err = missing.apply_to(&MemoryStore::new(), "east").unwrap_err();
        assert!(matches!(err, ReplicationError::Event(_)));
    }

    // -----------------------------------------------------------------------
    // Applying remote events
    // -----------------------------------------------------------------------

    #[test]
    fn local_events_are_ignored() {
        let store = MemoryStore::new();
        let event = ChangeEvent::update("east", StoredObject::new("a", "T", json!({})));
        assert_eq!(event.apply_to(&store, "east").unwrap(), Applied::Ignored);
        assert!(store.is_empty());
    }

    #[test]
    fn update_creates_then_replaces() {
        let source = MemoryStore::new();
        let replica = MemoryStore::new();

        let created = source.create(object_with_payload("a", "p", b"v1")).unwrap();
        let mut event = ChangeEvent::update("west", created);
        event.add_payload_bytes("p", b"v1");
        let json = event.to_json().unwrap();

        let applied = ChangeEvent::from_json(&json).unwrap().apply_to(&replica, "east").unwrap();
        assert!(matches!(applied, Applied::Created(_)));
        assert_eq!(read(&replica, "a", "p").unwrap(), b"v1");
        assert_eq!(replica.get("a").unwrap().payload("p").unwrap().size, 2);

        let mut changed = source.get("a").unwrap();
        changed.content = json!({"v": 2});
        let event = ChangeEvent::update("west", changed);
        let applied = event.apply_to(&replica, "east").unwrap();
        assert!(matches!(applied, Applied::Updated(_)));
        assert_eq!(replica.get("a").unwrap().content, json!({"v": 2}));
        assert_eq!(read(&replica, "a", "p").unwrap(), b"v1");
    }

    #[test]
    fn update_removes_dropped_payloads() {
        let replica = MemoryStore::new();
        replica.create(object_with_payload("a", "old", b"x")).unwrap();

        let mut event = ChangeEvent::update("west", StoredObject::new("a", "Document", json!({})));
        event.add_payload_bytes("new", b"y");
        event.apply_to(&replica, "east").unwrap();

        let stored = replica.get("a").unwrap();
        assert_eq!(stored.payload_names().collect::<Vec<_>>(), vec!["new"]);
        assert!(read(&replica, "a", "old").is_none());
        assert_eq!(read(&replica, "a", "new").unwrap(), b"y");
    }

    #[test]
    fn delete_tolerates_absent_object() {
        let replica = MemoryStore::new();
        replica.create(StoredObject::new("a", "T", json!({}))).unwrap();

        let event = ChangeEvent::delete("west", "a");
        assert_eq!(event.clone().apply_to(&replica, "east").unwrap(), Applied::Deleted);
        assert_eq!(event.apply_to(&replica, "east").unwrap(), Applied::AlreadyAbsent);
    }
}
