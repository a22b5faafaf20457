use fleetline::control::transport::handle_frame;
use fleetline::control::ControlPlane;
use std::future::Future;
use std::io;
use std::sync::Arc;

/// Serves [`ControlPlane`] commands over NATS request/reply.
///
/// Requests carry a JSON `TransportEnvelope`; the reply is the encoded
/// `TransportReply`. Frames are handled one at a time, in arrival order.
pub struct ControlListener {
    url: String,
    subject: String,
    plane: Arc<ControlPlane>,
}

impl ControlListener {
    pub fn new(url: impl Into<String>, subject: impl Into<String>, plane: Arc<ControlPlane>) -> Self {
        Self { url: url.into(), subject: subject.into(), plane }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Listen until `shutdown` resolves or the subscription ends.
    pub async fn serve<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let client = nats::asynk::connect(self.url.as_str()).await?;
        let subscription = client.subscribe(&self.subject).await?;
        tracing::info!(target: "fleetline::control", subject = %self.subject, "control listener ready");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                msg = subscription.next() => {
                    let Some(msg) = msg else { break };
                    let reply = handle_frame(&self.plane, &msg.data).await;
                    if msg.reply.is_none() {
                        tracing::debug!(target: "fleetline::control", "control frame without reply subject");
                        continue;
                    }
                    if let Err(error) = msg.respond(reply).await {
                        tracing::warn!(target: "fleetline::control", %error, "failed to send control reply");
                    }
                }
            }
        }

        tracing::info!(target: "fleetline::control", subject = %self.subject, "control listener stopped");
        subscription.unsubscribe().await?;
        client.close().await
    }
}
