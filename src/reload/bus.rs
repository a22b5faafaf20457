use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Reload channel failures. Recoverable: logged where they happen, never propagated
/// into the mutation or the worker's main loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("reload channel connection failed: {0}")]
    Connect(String),
    #[error("reload publish failed: {0}")]
    Publish(String),
    #[error("reload subscribe failed: {0}")]
    Subscribe(String),
    #[error("reload channel closed")]
    Closed,
}

/// Pub/sub transport for reload notifications.
///
/// Implementations give each subscription its own delivery; a subscriber that is not
/// connected at publish time never sees the message.
#[async_trait]
pub trait ReloadChannel: Send + Sync {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), ChannelError>;

    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>, ChannelError>;
}

#[derive(Debug, Default)]
struct BusInner {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    fail_publish: AtomicBool,
    fail_subscribe: AtomicBool,
}

/// Broadcast-backed channel for a single process. Clones share subscribers.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBus {
    inner: Arc<BusInner>,
}

const BUS_CAPACITY: usize = 64;

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_publish(&self, fail: bool) {
        self.inner.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.inner.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        let channels = self.inner.channels.lock().unwrap_or_else(|p| p.into_inner());
        channels.get(channel).map(|tx| tx.receiver_count()).unwrap_or(0)
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self.inner.channels.lock().unwrap_or_else(|p| p.into_inner());
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(BUS_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl ReloadChannel for InMemoryBus {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), ChannelError> {
        if self.inner.fail_publish.load(Ordering::SeqCst) {
            return Err(ChannelError::Publish("in-memory bus rejected publish".into()));
        }
        // No receivers is not an error: nobody was listening.
        let _ = self.sender(channel).send(payload);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>, ChannelError> {
        if self.inner.fail_subscribe.load(Ordering::SeqCst) {
            return Err(ChannelError::Subscribe(format!("cannot subscribe to {channel}")));
        }
        let rx = self.sender(channel).subscribe();
        let messages = stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => return Some((msg, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(target: "fleetline::reload", skipped, "reload subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(Box::pin(messages))
    }
}
