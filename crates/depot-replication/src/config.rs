use std::fs;
use std::path::Path;
use std::sync::Arc;

use depot_store::StoreConfig;
use serde::{Deserialize, Serialize};

use crate::channel::ReplicationChannel;
use crate::error::{ChannelResult, ReplicationError, ReplicationResult};
use crate::fanout::{Durability, FanoutChannel};
use crate::log_channel::{LogChannel, LogChannelConfig};
use crate::traced::TracedChannel;

/// How change events leave this cluster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Identifies this cluster in every event it publishes.
    pub cluster_id: String,
    /// One log-backed channel per entry.
    #[serde(default)]
    pub producers: Vec<LogChannelConfig>,
    /// Declared durability when more than one producer is configured.
    #[serde(default)]
    pub durability: Durability,
    /// Embed payload bytes in UPDATE events.
    #[serde(default)]
    pub include_payloads: bool,
    /// Report per-send latency through `tracing`.
    #[serde(default)]
    pub trace: bool,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            cluster_id: "local".to_string(),
            producers: Vec::new(),
            durability: Durability::default(),
            include_payloads: false,
            trace: false,
        }
    }
}

impl ReplicationConfig {
    /// Build the configured channel.
    ///
    /// No producers means no replication. One producer yields its log
    /// channel directly; several are combined in a fan-out channel.
    pub fn build_channel(&self) -> ChannelResult<Option<Arc<dyn ReplicationChannel>>> {
        let channel: Arc<dyn ReplicationChannel> = match self.producers.as_slice() {
            [] => return Ok(None),
            [single] => Arc::new(LogChannel::new(&self.cluster_id, single)?),
            many => {
                let children = many
                    .iter()
                    .map(|config| {
                        LogChannel::new(&self.cluster_id, config)
                            .map(|c| Arc::new(c) as Arc<dyn ReplicationChannel>)
                    })
                    .collect::<ChannelResult<Vec<_>>>()?;
                Arc::new(FanoutChannel::new(children, self.durability)?)
            }
        };
        if self.trace {
            Ok(Some(Arc::new(TracedChannel::new(channel))))
        } else {
            Ok(Some(channel))
        }
    }
}

/// Top-level repository configuration (`depot.toml`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepotConfig {
    #[serde(default)]
    pub storage: StoreConfig,
    #[serde(default)]
    pub replication: Option<ReplicationConfig>,
}

impl DepotConfig {
    pub fn from_toml(text: &str) -> ReplicationResult<Self> {
        toml::from_str(text).map_err(|e| ReplicationError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> ReplicationResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| ReplicationError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    pub fn to_toml(&self) -> ReplicationResult<String> {
        toml::to_string_pretty(self).map_err(|e| ReplicationError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChannelError;
    use crate::log::{partition_for, read_partition, DEFAULT_PARTITIONS};
    use crate::log_channel::topic_for;
    use depot_store::StorageBackend;

    fn producers(roots: &[&Path]) -> Vec<LogChannelConfig> {
        roots
            .iter()
            .map(|root| LogChannelConfig::new(root.display().to_string()))
            .collect()
    }

    #[test]
    fn defaults() {
        let config = ReplicationConfig::default();
        assert_eq!(config.durability, Durability::All);
        assert!(!config.include_payloads);
        assert!(config.build_channel().unwrap().is_none());
    }

    #[test]
    fn parse_full_file() {
        let config = DepotConfig::from_toml(
            r#"
            [storage.backend]
            module = "memory"

            [replication]
            cluster_id = "east"
            include_payloads = true

            [[replication.producers]]
            bootstrap_servers = "/var/lib/depot/log"

            [replication.producers.producer_config]
            acks = "1"
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.backend, StorageBackend::Memory);
        let replication = config.replication.unwrap();
        assert_eq!(replication.cluster_id, "east");
        assert!(replication.include_payloads);
        assert_eq!(replication.producers.len(), 1);
        assert_eq!(replication.producers[0].producer_config["acks"], "1");
    }

    #[test]
    fn empty_file_is_default() {
        assert_eq!(DepotConfig::from_toml("").unwrap(), DepotConfig::default());
        assert!(DepotConfig::from_toml("storage = 3").is_err());
    }

    #[test]
    fn single_producer_sends_directly() {
        let dir = tempfile::tempdir().unwrap();
        let config = ReplicationConfig {
            cluster_id: "east".into(),
            producers: producers(&[dir.path()]),
            ..ReplicationConfig::default()
        };
        let channel = config.build_channel().unwrap().unwrap();
        channel.send("obj", "m").unwrap();
        channel.shutdown().unwrap();

        let partition = partition_for("obj", DEFAULT_PARTITIONS);
        assert_eq!(read_partition(dir.path(), &topic_for("east"), partition).unwrap().len(), 1);
    }

    #[test]
    fn several_producers_fan_out() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let config = ReplicationConfig {
            cluster_id: "east".into(),
            producers: producers(&[a.path(), b.path()]),
            trace: true,
            ..ReplicationConfig::default()
        };
        let channel = config.build_channel().unwrap().unwrap();
        channel.send("obj", "m").unwrap();
        channel.shutdown().unwrap();

        let partition = partition_for("obj", DEFAULT_PARTITIONS);
        for root in [a.path(), b.path()] {
            assert_eq!(read_partition(root, &topic_for("east"), partition).unwrap().len(), 1);
        }
    }

    #[test]
    fn unsupported_durability_is_rejected() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let config = ReplicationConfig {
            producers: producers(&[a.path(), b.path()]),
            durability: Durability::Majority,
            ..ReplicationConfig::default()
        };
        assert!(matches!(
            config.build_channel(),
            Err(ChannelError::UnsupportedDurability(_))
        ));
    }
}
