//! Per-process worker startup: bootstrap, reload subscription, initial cache load.
//!
//! ```rust
//! use fleetline::config::ServiceConfiguration;
//! use fleetline::reload::InMemoryBus;
//! use fleetline::store::InMemoryConfigStore;
//! use fleetline::worker::{NoTransport, WorkerRuntime};
//! use std::sync::Arc;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let worker = WorkerRuntime::new(ServiceConfiguration::offline("rule-901"), Arc::new(InMemoryConfigStore::new()))
//!     .with_bus(Arc::new(InMemoryBus::new()))
//!     .start(&NoTransport)
//!     .await
//!     .unwrap();
//! assert_eq!(worker.cache().generation(), 1);
//! assert!(worker.connection().is_none());
//! # });
//! ```

use crate::bootstrap::{Bootstrapper, ConnectRequest, TransportConnector};
use crate::cache::{ConfigurationCache, ConfigurationSnapshot};
use crate::clock::{Sleeper, TokioSleeper};
use crate::config::ServiceConfiguration;
use crate::error::FleetError;
use crate::reload::{ReloadChannel, ReloadSubscriber, SubscriberHandle};
use crate::store::ConfigStore;
use crate::telemetry::{self, SharedSink};
use async_trait::async_trait;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::Instrument;

/// Connector for workers that run without a message transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTransport;

#[async_trait]
impl TransportConnector for NoTransport {
    type Connection = ();
    type Error = Infallible;

    async fn connect(&self, _request: &ConnectRequest) -> Result<(), Infallible> {
        Ok(())
    }
}

/// Everything a worker process needs before it can serve.
pub struct WorkerRuntime {
    config: ServiceConfiguration,
    slot: Option<usize>,
    store: Arc<dyn ConfigStore>,
    bus: Option<Arc<dyn ReloadChannel>>,
    sleeper: Arc<dyn Sleeper>,
    sink: SharedSink,
}

impl WorkerRuntime {
    pub fn new(config: ServiceConfiguration, store: Arc<dyn ConfigStore>) -> Self {
        Self {
            config,
            slot: None,
            store,
            bus: None,
            sleeper: Arc::new(TokioSleeper),
            sink: telemetry::null_sink(),
        }
    }

    /// Slot index assigned by the primary; absent for a sole worker.
    pub fn with_slot(mut self, slot: usize) -> Self {
        self.slot = Some(slot);
        self
    }

    /// Channel to subscribe for reload notifications. Without one the cache is only
    /// loaded at startup.
    pub fn with_bus(mut self, bus: Arc<dyn ReloadChannel>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &ServiceConfiguration {
        &self.config
    }

    /// Attach to the transport, start listening for reloads, and load the cache.
    ///
    /// Transport exhaustion is returned as a fatal [`FleetError::Bootstrap`]. A failed
    /// initial load is logged and leaves the empty snapshot in place until the next
    /// reload notification.
    pub async fn start<T>(self, connector: &T) -> Result<RunningWorker<T::Connection>, FleetError>
    where
        T: TransportConnector + ?Sized,
    {
        let span = tracing::info_span!(
            "worker",
            slot = self.slot.map(|s| s as i64).unwrap_or(-1),
            pid = std::process::id(),
            service = %self.config.service_name,
        );
        self.start_inner(connector, span.clone()).instrument(span).await
    }

    async fn start_inner<T>(
        self,
        connector: &T,
        span: tracing::Span,
    ) -> Result<RunningWorker<T::Connection>, FleetError>
    where
        T: TransportConnector + ?Sized,
    {
        let bootstrapper = Bootstrapper::from_config(&self.config)?
            .with_sleeper(self.sleeper.clone())
            .with_sink(self.sink.clone());
        let connection = bootstrapper
            .connect(connector, &ConnectRequest::from_config(&self.config))
            .await?
            .into_connection();

        let cache = Arc::new(ConfigurationCache::new(self.config.tenants.clone()));
        // Subscribe before the first fetch so a change committed during the load still
        // reaches this worker as a notification.
        let subscriber = match self.bus {
            Some(bus) => Some(
                ReloadSubscriber::new(bus, self.config.reload_channel.clone(), cache.clone(), self.store.clone())
                    .with_sink(self.sink.clone())
                    .start()
                    .await,
            ),
            None => {
                tracing::info!(target: "fleetline::reload", "no reload channel configured, hot reload disabled");
                None
            }
        };

        match cache.reload(self.store.as_ref()).await {
            Ok(snapshot) => tracing::info!(
                target: "fleetline::cache",
                generation = snapshot.generation,
                tenants = snapshot.tenants.len(),
                "initial configuration loaded"
            ),
            Err(error) => tracing::error!(
                target: "fleetline::cache",
                %error,
                "initial configuration load failed, serving empty configuration"
            ),
        }

        tracing::info!(target: "fleetline::bootstrap", mode = %self.config.mode, "worker started");
        Ok(RunningWorker { config: self.config, span, cache, store: self.store, subscriber, connection })
    }
}

/// A started worker. Dropping it stops the reload listener.
pub struct RunningWorker<C> {
    config: ServiceConfiguration,
    span: tracing::Span,
    cache: Arc<ConfigurationCache>,
    store: Arc<dyn ConfigStore>,
    subscriber: Option<SubscriberHandle>,
    connection: Option<C>,
}

impl<C> RunningWorker<C> {
    pub fn config(&self) -> &ServiceConfiguration {
        &self.config
    }

    /// The `worker` span service code should run under.
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn cache(&self) -> &Arc<ConfigurationCache> {
        &self.cache
    }

    pub fn snapshot(&self) -> Arc<ConfigurationSnapshot> {
        self.cache.current()
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    /// `None` in offline mode.
    pub fn connection(&self) -> Option<&C> {
        self.connection.as_ref()
    }

    pub fn subscriber(&self) -> Option<&SubscriberHandle> {
        self.subscriber.as_ref()
    }

    pub fn subscriber_mut(&mut self) -> Option<&mut SubscriberHandle> {
        self.subscriber.as_mut()
    }

    /// Stop listening for reloads and hand back the connection.
    pub fn shutdown(mut self) -> Option<C> {
        if let Some(handle) = self.subscriber.as_mut() {
            handle.shutdown();
        }
        tracing::info!(target: "fleetline::bootstrap", parent: &self.span, "worker stopped");
        self.connection.take()
    }
}

impl<C> Drop for RunningWorker<C> {
    fn drop(&mut self) {
        if let Some(handle) = self.subscriber.as_mut() {
            handle.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::BootstrapError;
    use crate::config::{BootstrapSettings, ExecutionMode};
    use crate::reload::{InMemoryBus, ReloadNotification, SubscriberState};
    use crate::store::{ConfigEntity, EntityKey, EntityKind, InMemoryConfigStore, Mutation, StoreError, TenantId};
    use crate::InstantSleeper;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct Down;

    #[async_trait]
    impl TransportConnector for Down {
        type Connection = ();
        type Error = String;

        async fn connect(&self, _request: &ConnectRequest) -> Result<(), String> {
            Err("no route to host".into())
        }
    }

    fn production() -> ServiceConfiguration {
        let mut config = ServiceConfiguration::offline("rule-901");
        config.mode = ExecutionMode::Production;
        config.bootstrap = BootstrapSettings { max_attempts: 2, retry_delay: Duration::from_secs(5) };
        config
    }

    #[tokio::test]
    async fn exhausted_bootstrap_is_fatal() {
        let err = WorkerRuntime::new(production(), Arc::new(InMemoryConfigStore::new()))
            .with_sleeper(Arc::new(InstantSleeper))
            .start(&Down)
            .await
            .err()
            .unwrap();
        assert!(err.is_fatal());
        assert!(matches!(err, FleetError::Bootstrap(BootstrapError::Exhausted { attempts: 2, .. })));
    }

    #[tokio::test]
    async fn startup_loads_cache_before_serving() {
        let store = InMemoryConfigStore::new();
        store
            .create(ConfigEntity::new(EntityKind::RuleConfig, "t1", "901", "1.0.0", json!({ "ruleActive": true })))
            .await
            .unwrap();
        let worker = WorkerRuntime::new(production(), Arc::new(store))
            .start(&NoTransport)
            .await
            .unwrap();
        assert!(worker.connection().is_some());
        let snapshot = worker.snapshot();
        assert_eq!(snapshot.generation, 1);
        let tenant = snapshot.tenant(&TenantId::from("t1")).unwrap();
        assert_eq!(tenant.find(EntityKind::RuleConfig, "901", "1.0.0").unwrap().body["ruleActive"], true);
        assert!(worker.subscriber().is_none());
    }

    #[tokio::test]
    async fn unavailable_store_at_startup_is_not_fatal() {
        let store = InMemoryConfigStore::new();
        store.set_unavailable(true);
        let worker = WorkerRuntime::new(ServiceConfiguration::offline("rule-901"), Arc::new(store))
            .with_bus(Arc::new(InMemoryBus::new()))
            .start(&NoTransport)
            .await
            .unwrap();
        assert_eq!(worker.cache().generation(), 0);
        assert_eq!(worker.subscriber().map(|s| s.state()), Some(SubscriberState::Listening));
    }

    #[tokio::test]
    async fn subscribe_failure_leaves_worker_running_stale() {
        let bus = InMemoryBus::new();
        bus.fail_subscribe(true);
        let worker = WorkerRuntime::new(ServiceConfiguration::offline("rule-901"), Arc::new(InMemoryConfigStore::new()))
            .with_bus(Arc::new(bus))
            .start(&NoTransport)
            .await
            .unwrap();
        assert!(worker.subscriber().unwrap().is_stale());
        assert_eq!(worker.cache().generation(), 1);
    }

    #[tokio::test]
    async fn shutdown_stops_listener_and_returns_connection() {
        let worker = WorkerRuntime::new(production(), Arc::new(InMemoryConfigStore::new()))
            .with_bus(Arc::new(InMemoryBus::new()))
            .start(&NoTransport)
            .await
            .unwrap();
        assert_eq!(worker.shutdown(), Some(()));
    }

    fn rule(active: bool) -> ConfigEntity {
        ConfigEntity::new(EntityKind::RuleConfig, "t1", "901", "1.0.0", json!({ "ruleActive": active }))
    }

    /// Commits a change and publishes it while the first rule listing is in flight,
    /// then answers that listing with the rows read before the change.
    struct ChangesDuringFirstLoad {
        inner: InMemoryConfigStore,
        bus: InMemoryBus,
        channel: String,
        raced: AtomicBool,
    }

    #[async_trait]
    impl ConfigStore for ChangesDuringFirstLoad {
        async fn tenants(&self) -> Result<Vec<TenantId>, StoreError> {
            self.inner.tenants().await
        }

        async fn list(&self, kind: EntityKind, tenant: &TenantId) -> Result<Vec<ConfigEntity>, StoreError> {
            let rows = self.inner.list(kind, tenant).await?;
            if kind == EntityKind::RuleConfig && !self.raced.swap(true, Ordering::SeqCst) {
                self.inner.update(rule(false)).await?;
                self.bus.publish(&self.channel, ReloadNotification::ping_now().encode()).await.unwrap();
            }
            Ok(rows)
        }

        async fn get(&self, key: &EntityKey) -> Result<Option<ConfigEntity>, StoreError> {
            self.inner.get(key).await
        }

        async fn create(&self, entity: ConfigEntity) -> Result<Mutation, StoreError> {
            self.inner.create(entity).await
        }

        async fn update(&self, entity: ConfigEntity) -> Result<Mutation, StoreError> {
            self.inner.update(entity).await
        }

        async fn remove(&self, key: &EntityKey) -> Result<Mutation, StoreError> {
            self.inner.remove(key).await
        }
    }

    #[tokio::test]
    async fn change_published_during_initial_load_is_not_missed() {
        let config = ServiceConfiguration::offline("rule-901");
        let bus = InMemoryBus::new();
        let inner = InMemoryConfigStore::new();
        inner.create(rule(true)).await.unwrap();
        let store = ChangesDuringFirstLoad {
            inner,
            bus: bus.clone(),
            channel: config.reload_channel.clone(),
            raced: AtomicBool::new(false),
        };

        let mut worker = WorkerRuntime::new(config, Arc::new(store))
            .with_bus(Arc::new(bus))
            .start(&NoTransport)
            .await
            .unwrap();

        let handled = tokio::time::timeout(Duration::from_secs(5), worker.subscriber_mut().unwrap().wait_handled(1))
            .await
            .expect("notification published during the initial load was never handled");
        assert_eq!(handled, Some(1));
        let key = rule(false).key();
        assert_eq!(worker.snapshot().get(&key).unwrap().body["ruleActive"], false);
    }
}
