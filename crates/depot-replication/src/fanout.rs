use std::fmt;
use std::sync::Arc;

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::channel::{ReplicationChannel, SendHandle};
use crate::error::{ChannelError, ChannelResult};

/// How many child channels must accept a message before it counts as sent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Durability {
    #[default]
    All,
    Majority,
    One,
    None,
}

impl Durability {
    /// Acknowledgements required out of `channels`.
    pub fn quorum(self, channels: usize) -> usize {
        match self {
            Self::All => channels,
            Self::Majority => channels.div_ceil(2),
            Self::One => 1,
            Self::None => 0,
        }
    }
}

impl fmt::Display for Durability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::All => "ALL",
            Self::Majority => "MAJORITY",
            Self::One => "ONE",
            Self::None => "NONE",
        };
        f.write_str(name)
    }
}

/// Sends every message to all of its child channels concurrently.
///
/// Only [`Durability::All`] is accepted: a send succeeds once every child has
/// accepted the message and fails with the first child failure observed.
/// Outcomes of the remaining children after a failure are not reported.
pub struct FanoutChannel {
    channels: Vec<Arc<dyn ReplicationChannel>>,
    durability: Durability,
    quorum_target: usize,
}

impl FanoutChannel {
    pub fn new(
        channels: Vec<Arc<dyn ReplicationChannel>>,
        durability: Durability,
    ) -> ChannelResult<Self> {
        if durability != Durability::All {
            return Err(ChannelError::UnsupportedDurability(durability.to_string()));
        }
        let quorum_target = durability.quorum(channels.len());
        debug!(channels = channels.len(), %durability, quorum_target, "fan-out channel ready");
        Ok(Self {
            channels,
            durability,
            quorum_target,
        })
    }

    pub fn durability(&self) -> Durability {
        self.durability
    }

    /// Acknowledgements the declared durability asks for. Sends currently
    /// wait for every child regardless.
    pub fn quorum_target(&self) -> usize {
        self.quorum_target
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl ReplicationChannel for FanoutChannel {
    fn send_async(&self, key: &str, message: &str) -> SendHandle {
        let handles: Vec<SendHandle> = self
            .channels
            .iter()
            .map(|channel| channel.send_async(key, message))
            .collect();
        SendHandle::new(async move { try_join_all(handles).await.map(|_| ()) })
    }

    fn shutdown(&self) -> ChannelResult<()> {
        let mut first_error = None;
        for (index, channel) in self.channels.iter().enumerate() {
            if let Err(e) = channel.shutdown() {
                warn!(index, error = %e, "child channel shutdown failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for FanoutChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanoutChannel")
            .field("channels", &self.channels.len())
            .field("durability", &self.durability)
            .field("quorum_target", &self.quorum_target)
            .finish()
    }
}
