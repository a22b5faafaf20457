use async_trait::async_trait;
use fleetline::config::ServiceConfiguration;
use fleetline::relay::{LogRelay, RelayContext, RelayError, RelayPlugin};
use fleetline_kafka::KafkaRelayPlugin;
use fleetline_nats::MessageHandler;
use std::sync::Arc;

/// Build the relay named by `RELAY_PLUGIN`. Construction errors are fatal.
pub fn select(config: &ServiceConfiguration) -> Result<Box<dyn RelayPlugin>, RelayError> {
    match config.relay_plugin.as_str() {
        "log" => Ok(Box::new(LogRelay::new())),
        "kafka" => Ok(Box::new(KafkaRelayPlugin::from_env(config.mode)?)),
        other => Err(RelayError::Config(format!("unknown relay plugin {other:?} (expected log or kafka)"))),
    }
}

/// Construct, then connect, the configured relay.
pub async fn start(config: &ServiceConfiguration, ctx: RelayContext) -> Result<Arc<dyn RelayPlugin>, RelayError> {
    let mut relay = select(config)?;
    relay.init(ctx).await?;
    Ok(Arc::from(relay))
}

/// Forwards every inbound transport message to the relay.
pub struct RelayHandler {
    relay: Arc<dyn RelayPlugin>,
}

impl RelayHandler {
    pub fn new(relay: Arc<dyn RelayPlugin>) -> Self {
        Self { relay }
    }
}

#[async_trait]
impl MessageHandler for RelayHandler {
    async fn handle(&self, subject: &str, data: Vec<u8>) -> Option<Vec<u8>> {
        // Send failures are already logged inside the relay span.
        if self.relay.relay(data.into()).await.is_err() {
            tracing::debug!(target: "fleetline::relay", subject, "message dropped after relay failure");
        }
        None
    }
}
