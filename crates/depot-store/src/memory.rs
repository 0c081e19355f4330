use std::io::{Cursor, Read};

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use depot_types::StoredObject;
use tracing::debug;

use crate::cursor::ResultCursor;
use crate::error::{StoreError, StoreResult};
use crate::range::ByteRange;
use crate::traits::{ObjectStore, PayloadReader};

/// In-memory object store.
///
/// Intended for tests and embedding. Records are held in their JSON exchange
/// form in a concurrent map; payload bytes are read fully into memory and
/// kept per object id. Nothing survives the process and payload memory is
/// unbounded.
pub struct MemoryStore {
    objects: DashMap<String, String>,
    payloads: DashMap<String, DashMap<String, Bytes>>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            payloads: DashMap::new(),
        }
    }

    /// Number of objects currently stored.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Total payload bytes held across all objects.
    pub fn total_payload_bytes(&self) -> u64 {
        self.payloads
            .iter()
            .map(|entry| {
                entry
                    .value()
                    .iter()
                    .map(|p| p.value().len() as u64)
                    .sum::<u64>()
            })
            .sum()
    }

    /// Remove every object and payload.
    pub fn clear(&self) {
        self.objects.clear();
        self.payloads.clear();
    }

    fn parse(id: &str, json: &str) -> StoreResult<StoredObject> {
        StoredObject::from_json(json).map_err(|e| {
            StoreError::Internal(format!("corrupt record for {id}: {e}"))
        })
    }

    /// Drain every payload source of `object` into memory, recording sizes.
    fn read_sources(object: &mut StoredObject) -> StoreResult<Vec<(String, Bytes)>> {
        let mut read = Vec::new();
        for payload in object.payloads.iter_mut().flatten() {
            let Some(mut source) = payload.take_source() else {
                continue;
            };
            let mut buf = Vec::new();
            source
                .read_to_end(&mut buf)
                .map_err(|e| StoreError::PayloadWrite {
                    id: object.id.clone(),
                    name: payload.name.clone(),
                    source: e,
                })?;
            payload.size = buf.len() as u64;
            read.push((payload.name.clone(), Bytes::from(buf)));
        }
        Ok(read)
    }

    fn payload_bytes(&self, id: &str, name: &str) -> Option<Bytes> {
        let payloads = self.payloads.get(id)?;
        let bytes = payloads.get(name)?;
        Some(bytes.value().clone())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for MemoryStore {
    fn get(&self, id: &str) -> StoreResult<StoredObject> {
        let json = self
            .objects
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Self::parse(id, json.value())
    }

    fn exists(&self, id: &str) -> StoreResult<bool> {
        Ok(self.objects.contains_key(id))
    }

    fn get_payload(&self, id: &str, name: &str) -> StoreResult<Option<PayloadReader>> {
        Ok(self
            .payload_bytes(id, name)
            .map(|bytes| Box::new(Cursor::new(bytes)) as PayloadReader))
    }

    fn get_payload_range(
        &self,
        id: &str,
        name: &str,
        start: Option<u64>,
        end: Option<u64>,
    ) -> StoreResult<Option<PayloadReader>> {
        Ok(self.payload_bytes(id, name).map(|bytes| {
            let range = ByteRange::resolve(start, end, bytes.len() as u64);
            let window = bytes.slice(range.offset as usize..range.end() as usize);
            Box::new(Cursor::new(window)) as PayloadReader
        }))
    }

    fn create(&self, mut object: StoredObject) -> StoreResult<StoredObject> {
        object.validate_id()?;
        if self.objects.contains_key(&object.id) {
            return Err(StoreError::Conflict(object.id));
        }

        let written = Self::read_sources(&mut object)?;
        object.take_payloads_to_delete();
        object.normalize_payloads();
        let json = object.to_json()?;

        match self.objects.entry(object.id.clone()) {
            Entry::Occupied(_) => return Err(StoreError::Conflict(object.id)),
            Entry::Vacant(slot) => {
                let bytes: DashMap<String, Bytes> = written.into_iter().collect();
                self.payloads.insert(object.id.clone(), bytes);
                slot.insert(json);
            }
        }

        debug!(id = %object.id, "object created");
        self.get(&object.id)
    }

    fn update(&self, mut object: StoredObject) -> StoreResult<StoredObject> {
        object.validate_id()?;
        if !self.objects.contains_key(&object.id) {
            return Err(StoreError::NotFound(object.id));
        }

        let staged = object.take_payloads_to_delete();
        if let Some(payloads) = self.payloads.get(&object.id) {
            for name in &staged {
                payloads.remove(name);
            }
        }

        let written = Self::read_sources(&mut object)?;
        if !written.is_empty() {
            let payloads = self.payloads.entry(object.id.clone()).or_default();
            for (name, bytes) in written {
                payloads.insert(name, bytes);
            }
        }

        object.normalize_payloads();
        let json = object.to_json()?;
        match self.objects.get_mut(&object.id) {
            Some(mut record) => *record = json,
            None => return Err(StoreError::NotFound(object.id)),
        }

        debug!(id = %object.id, deleted = staged.len(), "object updated");
        self.get(&object.id)
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        if self.objects.remove(id).is_none() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        self.payloads.remove(id);
        debug!(id = %id, "object deleted");
        Ok(())
    }

    /// Walks the map lazily. An open cursor holds a read lock on the shard
    /// it is positioned in: writing to the store from the thread that owns
    /// the cursor can deadlock, so drain or close it first.
    fn list(&self) -> StoreResult<ResultCursor<'_, StoredObject>> {
        let items = self
            .objects
            .iter()
            .map(|entry| Self::parse(entry.key(), entry.value()));
        Ok(ResultCursor::sized(self.objects.len(), items))
    }

    fn list_handles(&self) -> StoreResult<ResultCursor<'_, String>> {
        let items = self.objects.iter().map(|entry| Ok(entry.key().clone()));
        Ok(ResultCursor::sized(self.objects.len(), items))
    }

    fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("object_count", &self.len())
            .finish()
    }
}
