use std::time::Instant;

use depot_types::StoredObject;
use tracing::trace;

use crate::cursor::ResultCursor;
use crate::error::StoreResult;
use crate::traits::{ObjectStore, PayloadReader};

/// Run `f`, emitting a trace event with its wall-clock latency.
pub fn timed<T>(operation: &'static str, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let result = f();
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    trace!(operation, elapsed_ms, "timed");
    result
}

/// Wraps a store so that every operation reports its latency.
///
/// Cursors are timed only up to the point they are handed out.
#[derive(Debug)]
pub struct TracedStore<S> {
    inner: S,
}

impl<S: ObjectStore> TracedStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: ObjectStore> ObjectStore for TracedStore<S> {
    fn get(&self, id: &str) -> StoreResult<StoredObject> {
        timed("get", || self.inner.get(id))
    }

    fn get_many(&self, ids: Vec<String>) -> ResultCursor<'_, StoredObject> {
        timed("get_many", || self.inner.get_many(ids))
    }

    fn exists(&self, id: &str) -> StoreResult<bool> {
        timed("exists", || self.inner.exists(id))
    }

    fn get_payload(&self, id: &str, name: &str) -> StoreResult<Option<PayloadReader>> {
        timed("get_payload", || self.inner.get_payload(id, name))
    }

    fn get_payload_range(
        &self,
        id: &str,
        name: &str,
        start: Option<u64>,
        end: Option<u64>,
    ) -> StoreResult<Option<PayloadReader>> {
        timed("get_payload_range", || {
            self.inner.get_payload_range(id, name, start, end)
        })
    }

    fn create(&self, object: StoredObject) -> StoreResult<StoredObject> {
        timed("create", || self.inner.create(object))
    }

    fn update(&self, object: StoredObject) -> StoreResult<StoredObject> {
        timed("update", || self.inner.update(object))
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        timed("delete", || self.inner.delete(id))
    }

    fn list(&self) -> StoreResult<ResultCursor<'_, StoredObject>> {
        timed("list", || self.inner.list())
    }

    fn list_handles(&self) -> StoreResult<ResultCursor<'_, String>> {
        timed("list_handles", || self.inner.list_handles())
    }

    fn list_by_type(&self, types: &[String]) -> StoreResult<ResultCursor<'_, StoredObject>> {
        timed("list_by_type", || self.inner.list_by_type(types))
    }

    fn list_handles_by_type(&self, types: &[String]) -> StoreResult<ResultCursor<'_, String>> {
        timed("list_handles_by_type", || self.inner.list_handles_by_type(types))
    }

    fn close(&self) -> StoreResult<()> {
        timed("close", || self.inner.close())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::memory::MemoryStore;
    use serde_json::json;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Run `f` under a TRACE-level subscriber and return what it logged.
    fn capture(f: impl FnOnce()) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = captured.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    fn timed_lines(output: &str) -> Vec<&str> {
        output.lines().filter(|l| l.contains("timed")).collect()
    }

    #[test]
    fn timed_returns_closure_result() {
        assert_eq!(timed("answer", || 42), 42);
    }

    #[test]
    fn traced_store_forwards() {
        let store = TracedStore::new(MemoryStore::new());
        store
            .create(StoredObject::new("a", "Document", json!({})))
            .unwrap();
        assert!(store.exists("a").unwrap());
        assert_eq!(store.list_handles().unwrap().collect_all().unwrap(), vec!["a"]);
        store.delete("a").unwrap();
        assert!(store.inner().is_empty());
    }

    #[test]
    fn errors_pass_through_unchanged() {
        let store = TracedStore::new(MemoryStore::new());
        assert!(matches!(store.get("missing"), Err(StoreError::NotFound(id)) if id == "missing"));
        assert!(matches!(store.delete("missing"), Err(StoreError::NotFound(_))));
        assert!(matches!(
            store.update(StoredObject::new("missing", "Document", json!({}))),
            Err(StoreError::NotFound(_))
        ));

        store
            .create(StoredObject::new("a", "Document", json!({})))
            .unwrap();
        assert!(matches!(
            store.create(StoredObject::new("a", "Document", json!({}))),
            Err(StoreError::Conflict(id)) if id == "a"
        ));
        assert!(store.get_payload("a", "none").unwrap().is_none());
    }

    #[test]
    fn each_operation_emits_one_timed_event() {
        let store = TracedStore::new(MemoryStore::new());
        let output = capture(|| {
            store
                .create(StoredObject::new("a", "Document", json!({})))
                .unwrap();
            let _ = store.get("missing");
            store.delete("a").unwrap();
        });

        let lines = timed_lines(&output);
        assert_eq!(lines.len(), 3, "{output}");
        for (line, operation) in lines.iter().zip(["create", "get", "delete"]) {
            assert!(line.contains("TRACE"), "{line}");
            assert!(line.contains(operation), "{line}");
            assert!(line.contains("elapsed_ms="), "{line}");
        }
    }
}
