//! NATS bindings for `fleetline` (companion crate).
//!
//! - [`NatsTransport`]: the worker's message transport, attached through the
//!   bootstrapper's bounded retry loop
//! - [`NatsReloadBus`]: the `config:reload` pub/sub channel
//! - [`ControlListener`]: request/reply front end for the control plane
//!
//! ```rust,no_run
//! use fleetline::bootstrap::{Bootstrapper, ConnectRequest};
//! use fleetline::config::{BootstrapSettings, ExecutionMode};
//! use fleetline_nats::{LoggingHandler, NatsTransport};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = NatsTransport::new("nats://127.0.0.1:4222", Arc::new(LoggingHandler));
//! let request = ConnectRequest { subscriptions: vec!["sub-rule-901@1.0.0".into()], publish_subject: None };
//! let connection = Bootstrapper::new(BootstrapSettings::default(), ExecutionMode::Production)?
//!     .connect(&transport, &request)
//!     .await?;
//! # Ok(()) }
//! ```

mod bus;
mod control;
mod transport;

pub use bus::NatsReloadBus;
pub use control::ControlListener;
pub use transport::{LoggingHandler, MessageHandler, NatsConnection, NatsTransport};
