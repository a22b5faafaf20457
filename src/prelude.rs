//! Convenient re-exports for common fleetline types.
pub use crate::{
    backoff::{Backoff, BackoffError, MAX_BACKOFF},
    bootstrap::{BootstrapError, Bootstrapped, Bootstrapper, ConnectRequest, TransportConnector},
    cache::{ConfigurationCache, ConfigurationSnapshot},
    config::{BootstrapSettings, ExecutionMode, ServiceConfiguration},
    control::{CommandMeta, CommandResult, ConfigCommand, ControlPlane},
    error::{ErrorClass, FleetError},
    relay::{RelayContext, RelayError, RelayPayload, RelayPlugin},
    reload::{ReloadChannel, ReloadNotification, ReloadPublisher, ReloadSubscriber},
    retry::{BuildError, RetryPolicy, RetryPolicyBuilder},
    store::{ConfigEntity, ConfigStore, EntityKey, EntityKind, TenantId},
    topology::{restart::RestartPolicy, Role, Supervisor},
    worker::{RunningWorker, WorkerRuntime},
};
