use std::sync::Arc;

use depot_store::ObjectStore;
use depot_types::StoredObject;
use tracing::{debug, warn};

use crate::channel::{ReplicationChannel, SendHandle};
use crate::error::{ChannelError, ReplicationError, ReplicationResult};
use crate::event::ChangeEvent;

/// An object store whose mutations are published to a replication channel.
///
/// The store write always happens first. Once it has succeeded, exactly one
/// change event keyed by the object id is handed to the channel. A failed
/// send does not undo the write; it is reported as
/// [`ReplicationError::Replication`] so the caller can decide whether to
/// retry.
pub struct ReplicatedStore {
    store: Arc<dyn ObjectStore>,
    channel: Arc<dyn ReplicationChannel>,
    cluster_id: String,
    include_payloads: bool,
}

impl ReplicatedStore {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        channel: Arc<dyn ReplicationChannel>,
        cluster_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            channel,
            cluster_id: cluster_id.into(),
            include_payloads: false,
        }
    }

    /// Embed payload bytes in UPDATE events.
    pub fn with_payloads(mut self, include: bool) -> Self {
        self.include_payloads = include;
        self
    }

    /// The underlying store, for reads.
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn channel(&self) -> &Arc<dyn ReplicationChannel> {
        &self.channel
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// Create an object and wait for its change event to be accepted.
    pub fn create(&self, object: StoredObject) -> ReplicationResult<StoredObject> {
        let stored = self.store.create(object)?;
        self.publish_update(&stored)?;
        Ok(stored)
    }

    /// Update an object and wait for its change event to be accepted.
    pub fn update(&self, object: StoredObject) -> ReplicationResult<StoredObject> {
        let stored = self.store.update(object)?;
        self.publish_update(&stored)?;
        Ok(stored)
    }

    /// Delete an object and wait for its change event to be accepted.
    pub fn delete(&self, id: &str) -> ReplicationResult<()> {
        self.store.delete(id)?;
        let message = self.encode(id, &ChangeEvent::delete(&self.cluster_id, id))?;
        self.send(id, &message)
    }

    /// Create an object and return without waiting for replication.
    pub fn create_async(&self, object: StoredObject) -> ReplicationResult<(StoredObject, SendHandle)> {
        let stored = self.store.create(object)?;
        let handle = self.publish_update_async(&stored)?;
        Ok((stored, handle))
    }

    pub fn update_async(&self, object: StoredObject) -> ReplicationResult<(StoredObject, SendHandle)> {
        let stored = self.store.update(object)?;
        let handle = self.publish_update_async(&stored)?;
        Ok((stored, handle))
    }

    pub fn delete_async(&self, id: &str) -> ReplicationResult<SendHandle> {
        self.store.delete(id)?;
        let message = self.encode(id, &ChangeEvent::delete(&self.cluster_id, id))?;
        Ok(self.channel.send_async(id, &message))
    }

    /// Shut down the channel. The store stays open.
    pub fn shutdown(&self) -> ReplicationResult<()> {
        self.channel.shutdown()?;
        Ok(())
    }

    fn publish_update(&self, stored: &StoredObject) -> ReplicationResult<()> {
        let message = self.update_message(stored)?;
        self.send(&stored.id, &message)
    }

    fn publish_update_async(&self, stored: &StoredObject) -> ReplicationResult<SendHandle> {
        let message = self.update_message(stored)?;
        Ok(self.channel.send_async(&stored.id, &message))
    }

    fn send(&self, id: &str, message: &str) -> ReplicationResult<()> {
        self.channel.send(id, message).map_err(|source| {
            warn!(handle = %id, error = %source, "change event not replicated");
            ReplicationError::Replication {
                handle: id.to_string(),
                source,
            }
        })?;
        debug!(handle = %id, "change event replicated");
        Ok(())
    }

    fn update_message(&self, stored: &StoredObject) -> ReplicationResult<String> {
        let mut event = ChangeEvent::update(&self.cluster_id, stored.clone());
        if self.include_payloads {
            for name in stored.payload_names() {
                let bytes = self
                    .store
                    .read_payload(&stored.id, name)
                    .map_err(|e| replication_failure(&stored.id, format!("reading payload {name}: {e}")))?;
                if let Some(bytes) = bytes {
                    event.add_payload_bytes(name, &bytes);
                }
            }
        }
        self.encode(&stored.id, &event)
    }

    fn encode(&self, id: &str, event: &ChangeEvent) -> ReplicationResult<String> {
        event
            .to_json()
            .map_err(|e| replication_failure(id, e.to_string()))
    }
}

/// Failures after the store write are replication failures, never store
/// failures.
fn replication_failure(id: &str, message: String) -> ReplicationError {
    ReplicationError::Replication {
        handle: id.to_string(),
        source: ChannelError::Message(message),
    }
}

impl std::fmt::Debug for ReplicatedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicatedStore")
            .field("cluster_id", &self.cluster_id)
            .field("include_payloads", &self.include_payloads)
            .finish()
    }
}
