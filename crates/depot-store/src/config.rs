use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::durable::DurableStore;
use crate::error::StoreResult;
use crate::layout::{ShardLayout, ShardLayoutConfig};
use crate::memory::MemoryStore;
use crate::traced::TracedStore;
use crate::traits::ObjectStore;

/// Which backend holds the repository's objects.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "module", rename_all = "lowercase")]
pub enum StorageBackend {
    /// Volatile, process-local storage.
    Memory,
    /// SQLite records plus a hash-sharded payload tree under `path`.
    Durable {
        path: PathBuf,
        #[serde(default)]
        layout: ShardLayoutConfig,
    },
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::Durable {
            path: PathBuf::from("data"),
            layout: ShardLayoutConfig::default(),
        }
    }
}

/// Storage section of the repository configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Report per-operation latency through `tracing`.
    #[serde(default)]
    pub trace: bool,
}

impl StoreConfig {
    pub fn memory() -> Self {
        Self {
            backend: StorageBackend::Memory,
            trace: false,
        }
    }

    pub fn durable(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackend::Durable {
                path: path.into(),
                layout: ShardLayoutConfig::default(),
            },
            trace: false,
        }
    }
}

/// Open the configured backend.
pub fn open_store(config: &StoreConfig) -> StoreResult<Box<dyn ObjectStore>> {
    let store: Box<dyn ObjectStore> = match &config.backend {
        StorageBackend::Memory => Box::new(MemoryStore::new()),
        StorageBackend::Durable { path, layout } => Box::new(DurableStore::open_with_layout(
            path,
            ShardLayout::from_config(layout)?,
        )?),
    };
    if config.trace {
        Ok(Box::new(TracedStore::new(store)))
    } else {
        Ok(store)
    }
}
