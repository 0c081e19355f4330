use std::io::Read;

use depot_types::StoredObject;

use crate::cursor::ResultCursor;
use crate::error::{StoreError, StoreResult};

/// A readable stream of payload bytes.
pub type PayloadReader = Box<dyn Read + Send>;

/// Storage contract for objects and their payloads.
///
/// All implementations must satisfy these invariants:
/// - An id is unique within a store. `create` fails with `Conflict` on an
///   existing id, `update` and `delete` fail with `NotFound` on an absent one.
/// - Payload bytes are written before the metadata record that lists them.
/// - `create` and `update` return the stored copy re-read from the backend,
///   with payload sizes computed by the store.
/// - Concurrent updates to one id race; the last writer wins.
pub trait ObjectStore: Send + Sync {
    /// Read an object, failing with `NotFound` if it does not exist.
    fn get(&self, id: &str) -> StoreResult<StoredObject>;

    /// Look up many ids lazily.
    ///
    /// Ids that do not exist are skipped. Any other lookup failure is
    /// yielded in place of the object.
    fn get_many(&self, ids: Vec<String>) -> ResultCursor<'_, StoredObject> {
        ResultCursor::r#unsized(ids.into_iter().filter_map(move |id| match self.get(&id) {
            Ok(object) => Some(Ok(object)),
            Err(StoreError::NotFound(_)) => None,
            Err(e) => Some(Err(e)),
        }))
    }

    /// Check whether an object exists.
    fn exists(&self, id: &str) -> StoreResult<bool> {
        match self.get(id) {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Stream a payload's bytes.
    ///
    /// Returns `Ok(None)` if the object or the payload does not exist.
    fn get_payload(&self, id: &str, name: &str) -> StoreResult<Option<PayloadReader>>;

    /// Stream part of a payload; see [`ByteRange::resolve`] for how the
    /// bounds are interpreted.
    ///
    /// [`ByteRange::resolve`]: crate::range::ByteRange::resolve
    fn get_payload_range(
        &self,
        id: &str,
        name: &str,
        start: Option<u64>,
        end: Option<u64>,
    ) -> StoreResult<Option<PayloadReader>>;

    /// Read a whole payload into memory.
    fn read_payload(&self, id: &str, name: &str) -> StoreResult<Option<Vec<u8>>> {
        match self.get_payload(id, name)? {
            Some(mut reader) => {
                let mut bytes = Vec::new();
                reader.read_to_end(&mut bytes)?;
                Ok(Some(bytes))
            }
            None => Ok(None),
        }
    }

    /// Store a new object together with the bytes of every payload that
    /// carries a source.
    fn create(&self, object: StoredObject) -> StoreResult<StoredObject>;

    /// Replace an existing object. Staged payload deletions are applied
    /// first, then payloads carrying a source are (re)written.
    fn update(&self, object: StoredObject) -> StoreResult<StoredObject>;

    /// Remove an object and all of its payload bytes.
    fn delete(&self, id: &str) -> StoreResult<()>;

    /// Every object, with the size taken when the cursor is opened.
    fn list(&self) -> StoreResult<ResultCursor<'_, StoredObject>>;

    /// Every id, with the size taken when the cursor is opened.
    fn list_handles(&self) -> StoreResult<ResultCursor<'_, String>>;

    /// Objects whose type is one of `types`.
    fn list_by_type(&self, types: &[String]) -> StoreResult<ResultCursor<'_, StoredObject>> {
        let types = types.to_vec();
        Ok(self
            .list()?
            .filter_ok(move |object| types.contains(&object.object_type)))
    }

    /// Ids of objects whose type is one of `types`.
    fn list_handles_by_type(&self, types: &[String]) -> StoreResult<ResultCursor<'_, String>> {
        Ok(self.list_by_type(types)?.map_ok(|object| object.id))
    }

    /// Release backend resources. Call at most once.
    fn close(&self) -> StoreResult<()>;
}

impl<S: ObjectStore + ?Sized> ObjectStore for Box<S> {
    fn get(&self, id: &str) -> StoreResult<StoredObject> {
        (**self).get(id)
    }

    fn get_many(&self, ids: Vec<String>) -> ResultCursor<'_, StoredObject> {
        (**self).get_many(ids)
    }

    fn exists(&self, id: &str) -> StoreResult<bool> {
        (**self).exists(id)
    }

    fn get_payload(&self, id: &str, name: &str) -> StoreResult<Option<PayloadReader>> {
        (**self).get_payload(id, name)
    }

    fn get_payload_range(
        &self,
        id: &str,
        name: &str,
        start: Option<u64>,
        end: Option<u64>,
    ) -> StoreResult<Option<PayloadReader>> {
        (**self).get_payload_range(id, name, start, end)
    }

    fn create(&self, object: StoredObject) -> StoreResult<StoredObject> {
        (**self).create(object)
    }

    fn update(&self, object: StoredObject) -> StoreResult<StoredObject> {
        (**self).update(object)
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        (**self).delete(id)
    }

    fn list(&self) -> StoreResult<ResultCursor<'_, StoredObject>> {
        (**self).list()
    }

    fn list_handles(&self) -> StoreResult<ResultCursor<'_, String>> {
        (**self).list_handles()
    }

    fn list_by_type(&self, types: &[String]) -> StoreResult<ResultCursor<'_, StoredObject>> {
        (**self).list_by_type(types)
    }

    fn list_handles_by_type(&self, types: &[String]) -> StoreResult<ResultCursor<'_, String>> {
        (**self).list_handles_by_type(types)
    }

    fn close(&self) -> StoreResult<()> {
        (**self).close()
    }
}
