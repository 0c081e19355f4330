use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::oneshot;

use crate::error::{ChannelError, ChannelResult};

/// Completion handle for one asynchronous send.
///
/// Resolves to `Ok(())` once the message is durably accepted, or to the
/// failure that prevented it. Handles can be awaited on any executor or
/// waited on synchronously with [`SendHandle::wait`].
#[must_use = "a send is not known to have succeeded until its handle resolves"]
pub struct SendHandle(BoxFuture<'static, ChannelResult<()>>);

impl SendHandle {
    pub fn new(future: impl Future<Output = ChannelResult<()>> + Send + 'static) -> Self {
        Self(future.boxed())
    }

    /// A handle that is already resolved.
    pub fn ready(result: ChannelResult<()>) -> Self {
        Self::new(futures::future::ready(result))
    }

    /// A handle completed by a worker through a oneshot channel. A worker
    /// that drops the sender resolves the handle to `Abandoned`.
    pub fn from_receiver(receiver: oneshot::Receiver<ChannelResult<()>>) -> Self {
        Self::new(async move {
            receiver
                .await
                .unwrap_or_else(|_| Err(ChannelError::Abandoned))
        })
    }

    /// Block the calling thread until the send resolves.
    pub fn wait(self) -> ChannelResult<()> {
        futures::executor::block_on(self)
    }
}

impl Future for SendHandle {
    type Output = ChannelResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.0.as_mut().poll(cx)
    }
}

impl fmt::Debug for SendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SendHandle(..)")
    }
}

/// Publishes change events keyed by object id.
///
/// All messages sent with the same key are delivered in send order.
pub trait ReplicationChannel: Send + Sync {
    /// Start sending `message` under `key` without blocking.
    fn send_async(&self, key: &str, message: &str) -> SendHandle;

    /// Send and block until the message is accepted.
    ///
    /// Every failure is reported as [`ChannelError::SendFailed`] wrapping
    /// the original cause.
    fn send(&self, key: &str, message: &str) -> ChannelResult<()> {
        self.send_async(key, message)
            .wait()
            .map_err(|e| ChannelError::SendFailed(Box::new(e)))
    }

    /// Release the channel's resources. A second call fails with
    /// [`ChannelError::Shutdown`].
    fn shutdown(&self) -> ChannelResult<()>;
}

impl<C: ReplicationChannel + ?Sized> ReplicationChannel for Arc<C> {
    fn send_async(&self, key: &str, message: &str) -> SendHandle {
        (**self).send_async(key, message)
    }

    fn send(&self, key: &str, message: &str) -> ChannelResult<()> {
        (**self).send(key, message)
    }

    fn shutdown(&self) -> ChannelResult<()> {
        (**self).shutdown()
    }
}

impl<C: ReplicationChannel + ?Sized> ReplicationChannel for Box<C> {
    fn send_async(&self, key: &str, message: &str) -> SendHandle {
        (**self).send_async(key, message)
    }

    fn send(&self, key: &str, message: &str) -> ChannelResult<()> {
        (**self).send(key, message)
    }

    fn shutdown(&self) -> ChannelResult<()> {
        (**self).shutdown()
    }
}
