use super::{ReloadChannel, ReloadNotification};
use crate::store::Mutation;
use crate::telemetry::{self, FleetEvent, ReloadEvent, SharedSink};
use std::sync::Arc;

/// What happened to a reload signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    /// The mutation touched no rows.
    Skipped,
    /// The channel rejected the publish; the error was logged.
    Failed,
}

/// Fire-and-forget publisher used by the control plane after each mutation.
#[derive(Clone)]
pub struct ReloadPublisher {
    bus: Arc<dyn ReloadChannel>,
    channel: String,
    sink: SharedSink,
}

impl std::fmt::Debug for ReloadPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadPublisher").field("channel", &self.channel).finish_non_exhaustive()
    }
}

impl ReloadPublisher {
    pub fn new(bus: Arc<dyn ReloadChannel>, channel: impl Into<String>) -> Self {
        Self { bus, channel: channel.into(), sink: telemetry::null_sink() }
    }

    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Publish exactly once if the mutation changed anything. Never returns an error.
    pub async fn after_mutation(&self, mutation: &Mutation) -> PublishOutcome {
        if !mutation.changed() {
            tracing::debug!(
                target: "fleetline::reload",
                kind = %mutation.kind,
                tenant = %mutation.tenant_id,
                "mutation touched no rows, reload not published"
            );
            telemetry::emit(&self.sink, FleetEvent::Reload(ReloadEvent::PublishSkipped)).await;
            return PublishOutcome::Skipped;
        }
        self.publish(ReloadNotification::Reload {
            entity: mutation.kind,
            tenant: mutation.tenant_id.clone(),
        })
        .await
    }

    pub async fn publish(&self, notification: ReloadNotification) -> PublishOutcome {
        match self.bus.publish(&self.channel, notification.encode()).await {
            Ok(()) => {
                tracing::info!(
                    target: "fleetline::reload",
                    channel = %self.channel,
                    notification = %notification,
                    "reload signal published"
                );
                telemetry::emit(
                    &self.sink,
                    FleetEvent::Reload(ReloadEvent::Published { channel: self.channel.clone() }),
                )
                .await;
                PublishOutcome::Published
            }
            Err(error) => {
                tracing::error!(
                    target: "fleetline::reload",
                    channel = %self.channel,
                    %error,
                    "failed to publish reload signal"
                );
                telemetry::emit(
                    &self.sink,
                    FleetEvent::Reload(ReloadEvent::PublishFailed { channel: self.channel.clone() }),
                )
                .await;
                PublishOutcome::Failed
            }
        }
    }
}
