use async_trait::async_trait;
use fleetline::bootstrap::{ConnectRequest, TransportConnector};
use std::io;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Processes one inbound message. A returned payload is published on the request's
/// publish subject, when there is one.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, subject: &str, data: Vec<u8>) -> Option<Vec<u8>>;
}

/// Logs each message and produces nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn handle(&self, subject: &str, data: Vec<u8>) -> Option<Vec<u8>> {
        tracing::info!(target: "fleetline::transport", subject, bytes = data.len(), "message received");
        None
    }
}

/// Connects to a NATS server and installs the handler on every subscription.
#[derive(Clone)]
pub struct NatsTransport {
    url: String,
    handler: Arc<dyn MessageHandler>,
}

impl std::fmt::Debug for NatsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsTransport").field("url", &self.url).finish_non_exhaustive()
    }
}

impl NatsTransport {
    pub fn new(url: impl Into<String>, handler: Arc<dyn MessageHandler>) -> Self {
        Self { url: url.into(), handler }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TransportConnector for NatsTransport {
    type Connection = NatsConnection;
    type Error = io::Error;

    async fn connect(&self, request: &ConnectRequest) -> Result<NatsConnection, io::Error> {
        let client = nats::asynk::connect(self.url.as_str()).await?;
        let mut listeners: Vec<JoinHandle<()>> = Vec::with_capacity(request.subscriptions.len());
        for subject in &request.subscriptions {
            let subscription = match client.subscribe(subject).await {
                Ok(sub) => sub,
                Err(e) => {
                    for listener in &listeners {
                        listener.abort();
                    }
                    return Err(e);
                }
            };
            tracing::info!(target: "fleetline::transport", subject = %subject, "subscribed");
            let handler = self.handler.clone();
            let client = client.clone();
            let publish_subject = request.publish_subject.clone();
            listeners.push(tokio::spawn(async move {
                while let Some(msg) = subscription.next().await {
                    let Some(output) = handler.handle(&msg.subject, msg.data.clone()).await else {
                        continue;
                    };
                    if let Some(target) = &publish_subject {
                        if let Err(error) = client.publish(target, output).await {
                            tracing::warn!(target: "fleetline::transport", subject = %target, %error, "publish failed");
                        }
                    }
                }
            }));
        }
        Ok(NatsConnection { client, listeners })
    }
}

/// A live transport attachment. Dropping it stops the subscription listeners.
pub struct NatsConnection {
    client: nats::asynk::Connection,
    listeners: Vec<JoinHandle<()>>,
}

impl NatsConnection {
    pub fn client(&self) -> &nats::asynk::Connection {
        &self.client
    }

    pub async fn publish(&self, subject: &str, data: impl AsRef<[u8]>) -> io::Result<()> {
        self.client.publish(subject, data).await
    }

    pub async fn close(mut self) -> io::Result<()> {
        for listener in self.listeners.drain(..) {
            listener.abort();
        }
        self.client.close().await
    }
}

impl Drop for NatsConnection {
    fn drop(&mut self) {
        for listener in &self.listeners {
            listener.abort();
        }
    }
}
