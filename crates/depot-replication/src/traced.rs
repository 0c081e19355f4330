use std::time::Instant;

use depot_store::timed;
use tracing::trace;

use crate::channel::{ReplicationChannel, SendHandle};
use crate::error::ChannelResult;

/// Wraps a channel so that every send reports its latency.
///
/// Asynchronous sends are measured until their handle resolves.
#[derive(Debug)]
pub struct TracedChannel<C> {
    inner: C,
}

impl<C: ReplicationChannel> TracedChannel<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C: ReplicationChannel> ReplicationChannel for TracedChannel<C> {
    fn send_async(&self, key: &str, message: &str) -> SendHandle {
        let start = Instant::now();
        let handle = self.inner.send_async(key, message);
        let key = key.to_string();
        SendHandle::new(async move {
            let result = handle.await;
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            trace!(operation = "send_async", key = %key, elapsed_ms, ok = result.is_ok(), "timed");
            result
        })
    }

    fn send(&self, key: &str, message: &str) -> ChannelResult<()> {
        timed("send", || self.inner.send(key, message))
    }

    fn shutdown(&self) -> ChannelResult<()> {
        timed("shutdown", || self.inner.shutdown())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChannelError;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
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

    fn trace_subscriber(writer: Captured) -> impl tracing::Subscriber + Send + Sync {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish()
    }

    fn output(captured: &Captured) -> String {
        String::from_utf8(captured.0.lock().unwrap().clone()).unwrap()
    }

    #[derive(Default)]
    struct Counting {
        sends: AtomicUsize,
    }

    impl ReplicationChannel for Counting {
        fn send_async(&self, _key: &str, message: &str) -> SendHandle {
            self.sends.fetch_add(1, Ordering::SeqCst);
            if message == "bad" {
                SendHandle::ready(Err(ChannelError::Shutdown))
            } else {
                SendHandle::ready(Ok(()))
            }
        }

        fn shutdown(&self) -> ChannelResult<()> {
            Ok(())
        }
    }

    #[test]
    fn forwards_results() {
        let channel = TracedChannel::new(Counting::default());
        assert!(channel.send("k", "good").is_ok());
        assert!(matches!(channel.send("k", "bad"), Err(ChannelError::SendFailed(_))));
        assert!(channel.shutdown().is_ok());
        assert_eq!(channel.inner().sends.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn async_send_resolves_through_wrapper() {
        let channel = TracedChannel::new(Counting::default());
        assert!(channel.send_async("k", "good").await.is_ok());
        assert!(channel.send_async("k", "bad").await.is_err());
    }

    #[test]
    fn failed_send_keeps_its_error() {
        let channel = TracedChannel::new(Counting::default());
        let err = futures::executor::block_on(channel.send_async("k", "bad")).unwrap_err();
        assert!(matches!(err, ChannelError::Shutdown));
    }

    #[test]
    fn async_send_reports_outcome_when_resolved() {
        let captured = Captured::default();
        let channel = TracedChannel::new(Counting::default());
        tracing::subscriber::with_default(trace_subscriber(captured.clone()), || {
            let good = channel.send_async("obj/1", "good");
            let bad = channel.send_async("obj/2", "bad");
            // Nothing is reported before the handles resolve.
            assert!(!output(&captured).contains("send_async"));
            assert!(futures::executor::block_on(good).is_ok());
            assert!(futures::executor::block_on(bad).is_err());
        });

        let text = output(&captured);
        let lines: Vec<_> = text.lines().filter(|l| l.contains("send_async")).collect();
        assert_eq!(lines.len(), 2, "{text}");
        assert!(lines[0].contains("key=obj/1") && lines[0].contains("ok=true"), "{text}");
        assert!(lines[1].contains("key=obj/2") && lines[1].contains("ok=false"), "{text}");
        assert!(lines.iter().all(|l| l.contains("elapsed_ms=")));
    }
}
