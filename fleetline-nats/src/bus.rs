use async_trait::async_trait;
use fleetline::reload::{ChannelError, ReloadChannel};
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::OnceCell;

/// Reload channel over NATS core pub/sub.
///
/// Publishing shares one lazily opened connection. Each subscription gets a dedicated
/// connection, so a slow reload never backs up publishers in the same process.
#[derive(Debug)]
pub struct NatsReloadBus {
    url: String,
    publisher: OnceCell<nats::asynk::Connection>,
}

impl NatsReloadBus {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), publisher: OnceCell::new() }
    }

    async fn connect(&self) -> Result<nats::asynk::Connection, ChannelError> {
        nats::asynk::connect(self.url.as_str())
            .await
            .map_err(|e| ChannelError::Connect(format!("{}: {e}", self.url)))
    }
}

#[async_trait]
impl ReloadChannel for NatsReloadBus {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), ChannelError> {
        let client = self.publisher.get_or_try_init(|| self.connect()).await?;
        client.publish(channel, payload).await.map_err(|e| ChannelError::Publish(e.to_string()))?;
        client.flush().await.map_err(|e| ChannelError::Publish(e.to_string()))
    }

    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>, ChannelError> {
        let client = self.connect().await?;
        let subscription =
            client.subscribe(channel).await.map_err(|e| ChannelError::Subscribe(e.to_string()))?;
        // The connection rides along with the subscription so it stays open.
        let messages = stream::unfold((client, subscription), |(client, subscription)| async move {
            let msg = subscription.next().await?;
            let text = String::from_utf8_lossy(&msg.data).into_owned();
            Some((text, (client, subscription)))
        });
        Ok(messages.boxed())
    }
}
