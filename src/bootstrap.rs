//! Bounded transport bootstrap.
//!
//! A worker attaches to its message transport through a [`TransportConnector`]. The
//! [`Bootstrapper`] retries failed attempts a fixed number of times with a fixed delay
//! between them (no growth, no jitter) and gives up with
//! [`BootstrapError::Exhausted`], which the worker treats as fatal.
//!
//! ```rust
//! use async_trait::async_trait;
//! use fleetline::bootstrap::{Bootstrapped, Bootstrapper, ConnectRequest, TransportConnector};
//! use fleetline::config::{BootstrapSettings, ExecutionMode};
//! use fleetline::InstantSleeper;
//! use std::sync::Arc;
//!
//! struct Loopback;
//!
//! #[async_trait]
//! impl TransportConnector for Loopback {
//!     type Connection = &'static str;
//!     type Error = String;
//!     async fn connect(&self, _request: &ConnectRequest) -> Result<Self::Connection, String> {
//!         Ok("connected")
//!     }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let bootstrapper = Bootstrapper::new(BootstrapSettings::default(), ExecutionMode::Production)
//!     .unwrap()
//!     .with_sleeper(Arc::new(InstantSleeper));
//! let outcome = bootstrapper.connect(&Loopback, &ConnectRequest::default()).await.unwrap();
//! assert!(matches!(outcome, Bootstrapped::Connected("connected")));
//! # });
//! ```

use crate::clock::{Sleeper, TokioSleeper};
use crate::config::{BootstrapSettings, ExecutionMode, ServiceConfiguration};
use crate::retry::{AttemptFailure, BuildError, RetryPolicy};
use crate::telemetry::{self, BootstrapEvent, FleetEvent, SharedSink};
use crate::Backoff;
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the worker wants from the transport once connected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectRequest {
    pub subscriptions: Vec<String>,
    pub publish_subject: Option<String>,
}

impl ConnectRequest {
    pub fn from_config(config: &ServiceConfiguration) -> Self {
        Self {
            subscriptions: config.subscriptions.clone(),
            publish_subject: config.publish_subject.clone(),
        }
    }
}

/// One transport client. The connector owns the message handler it installs.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    type Connection: Send;
    type Error: fmt::Display + Send + Sync;

    async fn connect(&self, request: &ConnectRequest) -> Result<Self::Connection, Self::Error>;
}

/// A single attempt as scheduled by the bootstrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionAttempt {
    /// 1-based.
    pub attempt: usize,
    pub max_attempts: usize,
    /// Delay that preceded this attempt (zero for the first).
    pub delay: Duration,
}

impl fmt::Display for ConnectionAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.attempt, self.max_attempts)
    }
}

#[derive(Debug)]
pub enum Bootstrapped<C> {
    Connected(C),
    /// Offline execution mode; no connection was attempted.
    Offline,
}

impl<C> Bootstrapped<C> {
    pub fn is_offline(&self) -> bool {
        matches!(self, Bootstrapped::Offline)
    }

    pub fn into_connection(self) -> Option<C> {
        match self {
            Bootstrapped::Connected(conn) => Some(conn),
            Bootstrapped::Offline => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BootstrapError {
    #[error("unable to connect to transport after {attempts} attempts: {last_error}")]
    Exhausted { attempts: usize, last_error: String },
    #[error("invalid bootstrap policy: {0}")]
    InvalidPolicy(#[from] BuildError),
}

/// Runs the bounded attach loop.
#[derive(Clone)]
pub struct Bootstrapper {
    settings: BootstrapSettings,
    mode: ExecutionMode,
    sleeper: Arc<dyn Sleeper>,
    sink: SharedSink,
}

impl fmt::Debug for Bootstrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bootstrapper")
            .field("settings", &self.settings)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl Bootstrapper {
    pub fn new(settings: BootstrapSettings, mode: ExecutionMode) -> Result<Self, BootstrapError> {
        if settings.max_attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(0).into());
        }
        Ok(Self { settings, mode, sleeper: Arc::new(TokioSleeper), sink: telemetry::null_sink() })
    }

    pub fn from_config(config: &ServiceConfiguration) -> Result<Self, BootstrapError> {
        Self::new(config.bootstrap, config.mode)
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn settings(&self) -> BootstrapSettings {
        self.settings
    }

    fn policy(&self) -> Result<RetryPolicy, BuildError> {
        RetryPolicy::builder()
            .max_attempts(self.settings.max_attempts)
            .backoff(Backoff::constant(self.settings.retry_delay))
            .with_shared_sleeper(self.sleeper.clone())
            .build()
    }

    /// Attach through `connector`, or skip entirely in offline mode.
    pub async fn connect<T>(
        &self,
        connector: &T,
        request: &ConnectRequest,
    ) -> Result<Bootstrapped<T::Connection>, BootstrapError>
    where
        T: TransportConnector + ?Sized,
    {
        if self.mode.is_offline() {
            tracing::info!(target: "fleetline::bootstrap", mode = %self.mode, "offline mode, transport bootstrap skipped");
            telemetry::emit(&self.sink, FleetEvent::Bootstrap(BootstrapEvent::Skipped)).await;
            return Ok(Bootstrapped::Offline);
        }

        let policy = self.policy()?;
        let max_attempts = policy.max_attempts();
        // Failure events are queued by the (synchronous) observer and flushed before the
        // next attempt starts.
        let pending: Mutex<Vec<FleetEvent>> = Mutex::new(Vec::new());
        let attempts = AtomicUsize::new(0);

        let result = policy
            .execute(
                |attempt| {
                    attempts.store(attempt, Ordering::SeqCst);
                    let queued = std::mem::take(&mut *pending.lock().unwrap_or_else(|p| p.into_inner()));
                    let sink = self.sink.clone();
                    let current = ConnectionAttempt {
                        attempt,
                        max_attempts,
                        delay: policy.backoff().delay(attempt - 1),
                    };
                    async move {
                        for event in queued {
                            telemetry::emit_best_effort(sink.clone(), event).await;
                        }
                        tracing::info!(
                            target: "fleetline::bootstrap",
                            attempt = %current,
                            subscriptions = ?request.subscriptions,
                            "connecting to transport"
                        );
                        connector.connect(request).await
                    }
                },
                |failure: AttemptFailure<'_, T::Error>| {
                    match failure.next_delay {
                        Some(delay) => tracing::warn!(
                            target: "fleetline::bootstrap",
                            attempt = failure.attempt,
                            max_attempts = failure.max_attempts,
                            error = %failure.error,
                            retry_in_ms = delay.as_millis() as u64,
                            "transport connection failed, retrying"
                        ),
                        None => tracing::error!(
                            target: "fleetline::bootstrap",
                            attempt = failure.attempt,
                            max_attempts = failure.max_attempts,
                            error = %failure.error,
                            "transport connection failed, no attempts left"
                        ),
                    }
                    pending.lock().unwrap_or_else(|p| p.into_inner()).push(FleetEvent::Bootstrap(
                        BootstrapEvent::AttemptFailed {
                            attempt: failure.attempt,
                            max_attempts: failure.max_attempts,
                            next_delay: failure.next_delay,
                        },
                    ));
                },
            )
            .await;

        let queued = std::mem::take(&mut *pending.lock().unwrap_or_else(|p| p.into_inner()));
        for event in queued {
            telemetry::emit(&self.sink, event).await;
        }

        match result {
            Ok(connection) => {
                tracing::info!(
                    target: "fleetline::bootstrap",
                    attempt = attempts.load(Ordering::SeqCst),
                    "connected to transport"
                );
                telemetry::emit(
                    &self.sink,
                    FleetEvent::Bootstrap(BootstrapEvent::Connected { attempt: attempts.load(Ordering::SeqCst) }),
                )
                .await;
                Ok(Bootstrapped::Connected(connection))
            }
            Err(exhausted) => {
                telemetry::emit(
                    &self.sink,
                    FleetEvent::Bootstrap(BootstrapEvent::Exhausted { attempts: exhausted.attempts }),
                )
                .await;
                Err(BootstrapError::Exhausted {
                    attempts: exhausted.attempts,
                    last_error: exhausted.last_error.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{shared, MemorySink};
    use crate::TrackingSleeper;
    use std::sync::atomic::AtomicUsize;

    struct Refusing {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TransportConnector for Refusing {
        type Connection = ();
        type Error = std::io::Error;

        async fn connect(&self, _request: &ConnectRequest) -> Result<(), std::io::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused"))
        }
    }

    #[tokio::test]
    async fn offline_mode_never_calls_the_connector() {
        let connector = Refusing { calls: AtomicUsize::new(0) };
        let memory = MemorySink::new();
        let outcome = Bootstrapper::new(BootstrapSettings::default(), ExecutionMode::Offline)
            .unwrap()
            .with_sink(shared(memory.clone()))
            .connect(&connector, &ConnectRequest::default())
            .await
            .unwrap();
        assert!(outcome.is_offline());
        assert_eq!(connector.calls.load(Ordering::SeqCst), 0);
        assert_eq!(memory.events(), vec![FleetEvent::Bootstrap(BootstrapEvent::Skipped)]);
    }

    #[tokio::test]
    async fn exhaustion_reports_attempts_and_last_error() {
        let connector = Refusing { calls: AtomicUsize::new(0) };
        let sleeper = TrackingSleeper::new();
        let settings = BootstrapSettings { max_attempts: 3, retry_delay: Duration::from_millis(20) };
        let err = Bootstrapper::new(settings, ExecutionMode::Production)
            .unwrap()
            .with_sleeper(Arc::new(sleeper.clone()))
            .connect(&connector, &ConnectRequest::default())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            BootstrapError::Exhausted { attempts: 3, last_error: "connection refused".into() }
        );
        assert_eq!(connector.calls.load(Ordering::SeqCst), 3);
        assert_eq!(sleeper.calls(), vec![Duration::from_millis(20); 2]);
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let settings = BootstrapSettings { max_attempts: 0, retry_delay: Duration::ZERO };
        assert!(matches!(
            Bootstrapper::new(settings, ExecutionMode::Production),
            Err(BootstrapError::InvalidPolicy(BuildError::InvalidMaxAttempts(0)))
        ));
    }
}
