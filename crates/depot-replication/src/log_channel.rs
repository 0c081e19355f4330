use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::channel::{ReplicationChannel, SendHandle};
use crate::error::ChannelResult;
use crate::log::{FileLogProducer, LogProducer, STRING_SERIALIZER};

/// Fixed prefix of every replication topic. Consumers subscribe to
/// `^CordraReplication-.*`, so it must not change.
pub const TOPIC_PREFIX: &str = "CordraReplication";

/// Topic carrying the change events of `cluster_id`.
pub fn topic_for(cluster_id: &str) -> String {
    format!("{TOPIC_PREFIX}-{cluster_id}")
}

/// Connection settings for one log-backed channel.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogChannelConfig {
    pub bootstrap_servers: String,
    /// Client properties; entries here win over the built-in defaults.
    #[serde(default)]
    pub producer_config: BTreeMap<String, String>,
}

impl LogChannelConfig {
    pub fn new(bootstrap_servers: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            producer_config: BTreeMap::new(),
        }
    }

    /// Caller-supplied properties completed with the defaults for every key
    /// the caller left unset.
    pub fn client_properties(&self) -> BTreeMap<String, String> {
        let mut props = self.producer_config.clone();
        let defaults = [
            ("bootstrap.servers", self.bootstrap_servers.clone()),
            ("key.serializer", STRING_SERIALIZER.to_string()),
            ("value.serializer", STRING_SERIALIZER.to_string()),
            ("acks", "all".to_string()),
            ("client.id", format!("depot-{}", Uuid::now_v7())),
        ];
        for (key, value) in defaults {
            props.entry(key.to_string()).or_insert(value);
        }
        props
    }
}

/// A channel publishing to one topic of a partitioned log, keyed by object
/// id so that every event of an object lands in the same partition.
pub struct LogChannel {
    topic: String,
    producer: Box<dyn LogProducer>,
}

impl LogChannel {
    /// Connect a file-backed log producer for `cluster_id`.
    pub fn new(cluster_id: &str, config: &LogChannelConfig) -> ChannelResult<Self> {
        let producer = FileLogProducer::from_properties(&config.client_properties())?;
        Ok(Self::with_producer(cluster_id, producer))
    }

    /// Publish through an existing producer.
    pub fn with_producer(cluster_id: &str, producer: impl LogProducer + 'static) -> Self {
        let topic = topic_for(cluster_id);
        debug!(topic = %topic, "log channel ready");
        Self {
            topic,
            producer: Box::new(producer),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl ReplicationChannel for LogChannel {
    fn send_async(&self, key: &str, message: &str) -> SendHandle {
        self.producer.send(&self.topic, key, message)
    }

    fn shutdown(&self) -> ChannelResult<()> {
        self.producer.close()
    }
}

impl std::fmt::Debug for LogChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogChannel")
            .field("topic", &self.topic)
            .finish()
    }
}
