use super::{ReloadChannel, ReloadNotification};
use crate::cache::ConfigurationCache;
use crate::store::ConfigStore;
use crate::telemetry::{self, FleetEvent, ReloadEvent, SharedSink};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Observable state of a worker's reload subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Listening,
    /// Subscribing failed; the cache keeps whatever it loaded at startup.
    Stale,
    /// The channel ended or the subscriber was shut down.
    Stopped,
}

/// Listens on the reload channel and refreshes one cache.
pub struct ReloadSubscriber {
    bus: Arc<dyn ReloadChannel>,
    channel: String,
    cache: Arc<ConfigurationCache>,
    store: Arc<dyn ConfigStore>,
    sink: SharedSink,
}

impl ReloadSubscriber {
    pub fn new(
        bus: Arc<dyn ReloadChannel>,
        channel: impl Into<String>,
        cache: Arc<ConfigurationCache>,
        store: Arc<dyn ConfigStore>,
    ) -> Self {
        Self { bus, channel: channel.into(), cache, store, sink: telemetry::null_sink() }
    }

    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Open the subscription and spawn the listener task.
    ///
    /// Never fails: a subscribe error is logged and reported through
    /// [`SubscriberHandle::state`] as [`SubscriberState::Stale`].
    pub async fn start(self) -> SubscriberHandle {
        let (state_tx, state_rx) = watch::channel(SubscriberState::Listening);
        let (handled_tx, handled_rx) = watch::channel(0u64);

        let mut messages = match self.bus.subscribe(&self.channel).await {
            Ok(stream) => stream,
            Err(error) => {
                tracing::error!(
                    target: "fleetline::reload",
                    channel = %self.channel,
                    %error,
                    "failed to subscribe to reload channel, configuration will not hot-reload"
                );
                telemetry::emit(
                    &self.sink,
                    FleetEvent::Reload(ReloadEvent::SubscribeFailed { channel: self.channel.clone() }),
                )
                .await;
                let _ = state_tx.send(SubscriberState::Stale);
                return SubscriberHandle { state: state_rx, handled: handled_rx, task: None };
            }
        };

        tracing::info!(target: "fleetline::reload", channel = %self.channel, "subscribed to reload channel");
        telemetry::emit(
            &self.sink,
            FleetEvent::Reload(ReloadEvent::Subscribed { channel: self.channel.clone() }),
        )
        .await;

        let task = tokio::spawn(async move {
            // One notification at a time: the next reload starts only after this one
            // has swapped its snapshot in or failed.
            while let Some(payload) = messages.next().await {
                self.handle(&payload).await;
                handled_tx.send_modify(|n| *n += 1);
            }
            tracing::warn!(target: "fleetline::reload", channel = %self.channel, "reload channel closed");
            let _ = state_tx.send(SubscriberState::Stopped);
        });

        SubscriberHandle { state: state_rx, handled: handled_rx, task: Some(task) }
    }

    async fn handle(&self, payload: &str) {
        let notification = ReloadNotification::decode(payload);
        tracing::info!(
            target: "fleetline::reload",
            notification = %notification,
            "reload notification received, reloading configuration"
        );
        match self.cache.reload(self.store.as_ref()).await {
            Ok(snapshot) => {
                tracing::info!(
                    target: "fleetline::reload",
                    generation = snapshot.generation,
                    tenants = snapshot.tenants.len(),
                    "configuration reloaded"
                );
                telemetry::emit(
                    &self.sink,
                    FleetEvent::Reload(ReloadEvent::Applied {
                        generation: snapshot.generation,
                        tenants: snapshot.tenants.len(),
                    }),
                )
                .await;
            }
            Err(error) => {
                let retained = self.cache.generation();
                tracing::error!(
                    target: "fleetline::reload",
                    %error,
                    retained,
                    "configuration reload failed, keeping previous snapshot"
                );
                telemetry::emit(&self.sink, FleetEvent::Reload(ReloadEvent::Failed { retained })).await;
            }
        }
    }
}

/// Owned by the worker for as long as it wants hot reload.
#[derive(Debug)]
pub struct SubscriberHandle {
    state: watch::Receiver<SubscriberState>,
    handled: watch::Receiver<u64>,
    task: Option<JoinHandle<()>>,
}

impl SubscriberHandle {
    pub fn state(&self) -> SubscriberState {
        *self.state.borrow()
    }

    pub fn is_stale(&self) -> bool {
        self.state() == SubscriberState::Stale
    }

    /// Notifications processed so far, successful or not.
    pub fn handled(&self) -> u64 {
        *self.handled.borrow()
    }

    /// Resolve once at least `count` notifications have been processed.
    /// Returns the processed count, or `None` if the listener stopped first.
    pub async fn wait_handled(&mut self, count: u64) -> Option<u64> {
        self.handled.wait_for(|n| *n >= count).await.ok().map(|n| *n)
    }

    pub fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reload::InMemoryBus;
    use crate::store::{ConfigEntity, EntityKind, InMemoryConfigStore};
    use serde_json::json;

    #[tokio::test]
    async fn subscribe_failure_leaves_worker_stale() {
        let bus = InMemoryBus::new();
        bus.fail_subscribe(true);
        let cache = Arc::new(ConfigurationCache::new(Vec::new()));
        let handle = ReloadSubscriber::new(
            Arc::new(bus),
            "config:reload",
            cache,
            Arc::new(InMemoryConfigStore::new()),
        )
        .start()
        .await;
        assert!(handle.is_stale());
    }

    #[tokio::test]
    async fn ping_triggers_full_reload() {
        let bus = InMemoryBus::new();
        let store = InMemoryConfigStore::new();
        let cache = Arc::new(ConfigurationCache::new(Vec::new()));
        let mut handle =
            ReloadSubscriber::new(Arc::new(bus.clone()), "config:reload", cache.clone(), Arc::new(store.clone()))
                .start()
                .await;
        assert_eq!(handle.state(), SubscriberState::Listening);

        store
            .create(ConfigEntity::new(EntityKind::NetworkMap, "tenant-a", "default", "1.0.0", json!({})))
            .await
            .unwrap();
        bus.publish("config:reload", "not json at all".into()).await.unwrap();

        assert_eq!(handle.wait_handled(1).await, Some(1));
        assert_eq!(cache.generation(), 1);
        assert_eq!(cache.current().tenants.len(), 1);
        handle.shutdown();
    }
}
