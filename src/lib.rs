#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # fleetline
//!
//! Process topology and configuration propagation for a fleet of rule-processing
//! workers.
//!
//! ## Features
//!
//! - **Process topology**: a primary re-executes itself into one worker per CPU slot and
//!   restarts exited workers under a bounded restart budget
//! - **Transport bootstrap** with a fixed attempt bound and a constant delay
//! - **Hot reload**: mutations publish on `config:reload`, every subscribed worker
//!   re-reads the store and swaps its snapshot atomically
//! - **Relay plugins** with fail-fast tuning validation
//! - **Control plane** for configuration commands, with history and audit
//!
//! ## Quick Start
//!
//! ```rust
//! use fleetline::config::ServiceConfiguration;
//! use fleetline::control::{CommandMeta, ConfigCommand, ControlPlane};
//! use fleetline::reload::{InMemoryBus, ReloadPublisher};
//! use fleetline::store::{ConfigEntity, EntityKind, InMemoryConfigStore};
//! use fleetline::worker::{NoTransport, WorkerRuntime};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(InMemoryConfigStore::new());
//!     let bus = Arc::new(InMemoryBus::new());
//!
//!     let mut worker = WorkerRuntime::new(ServiceConfiguration::offline("rule-901"), store.clone())
//!         .with_bus(bus.clone())
//!         .start(&NoTransport)
//!         .await
//!         .unwrap();
//!
//!     let plane = ControlPlane::new(store, ReloadPublisher::new(bus, "config:reload"));
//!     let entity = ConfigEntity::new(EntityKind::RuleConfig, "t1", "901", "1.0.0", json!({ "ruleActive": false }));
//!     plane.execute(CommandMeta::new("1"), "admin", ConfigCommand::Create { entity }).await.unwrap();
//!
//!     worker.subscriber_mut().unwrap().wait_handled(1).await;
//!     assert_eq!(worker.cache().generation(), 2);
//! }
//! ```

pub mod backoff;
pub mod bootstrap;
pub mod cache;
pub mod clock;
pub mod config;
pub mod control;
pub mod error;
pub mod prelude;
pub mod relay;
pub mod reload;
pub mod retry;
pub mod store;
pub mod telemetry;
pub mod topology;
pub mod worker;

// Re-exports
pub use backoff::Backoff;
pub use bootstrap::{BootstrapError, Bootstrapped, Bootstrapper, ConnectRequest, TransportConnector};
pub use cache::{ConfigurationCache, ConfigurationSnapshot};
pub use clock::{Clock, InstantSleeper, ManualClock, MonotonicClock, Sleeper, TokioSleeper, TrackingSleeper};
pub use config::{ExecutionMode, ServiceConfiguration};
pub use error::{ErrorClass, FleetError};
pub use relay::{RelayContext, RelayError, RelayPayload, RelayPlugin};
pub use retry::{RetryPolicy, RetryPolicyBuilder};
pub use topology::{Role, Supervisor};
pub use worker::{RunningWorker, WorkerRuntime};
