//! Relay plugin contract.
//!
//! A relay forwards processed messages to a downstream system. Its lifecycle has two
//! steps: `init` connects the producer (errors propagate, no retry) and `relay` sends one
//! payload inside a `relay` span, logging and returning any failure to the caller.
//! Mandatory numeric tuning is validated when the plugin is constructed, before anything
//! touches the network.

use crate::telemetry::{self, FleetEvent, RelayEvent, SharedSink};
use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::Instrument;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("Invalid or missing '{param}': {value}")]
    InvalidTuning { param: &'static str, value: i64 },
    #[error("invalid relay configuration: {0}")]
    Config(String),
    #[error("relay connection failed: {0}")]
    Connect(String),
    #[error("relay send failed: {0}")]
    Send(String),
    #[error("relay used before init")]
    NotInitialized,
}

impl RelayError {
    /// Errors raised while building the plugin; fatal at startup.
    pub fn is_construction(&self) -> bool {
        matches!(self, RelayError::InvalidTuning { .. } | RelayError::Config(_))
    }
}

/// Reject non-positive tuning values.
pub fn require_positive(param: &'static str, value: i64) -> Result<u64, RelayError> {
    if value <= 0 {
        return Err(RelayError::InvalidTuning { param, value });
    }
    Ok(value as u64)
}

/// Payload handed to [`RelayPlugin::relay`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayPayload {
    Bytes(Vec<u8>),
    Text(String),
}

impl RelayPayload {
    /// Binary payloads are decoded as UTF-8, replacing invalid sequences.
    pub fn into_text(self) -> String {
        match self {
            RelayPayload::Bytes(bytes) => String::from_utf8(bytes)
                .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned()),
            RelayPayload::Text(text) => text,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RelayPayload::Bytes(bytes) => bytes.len(),
            RelayPayload::Text(text) => text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for RelayPayload {
    fn from(value: String) -> Self {
        RelayPayload::Text(value)
    }
}

impl From<&str> for RelayPayload {
    fn from(value: &str) -> Self {
        RelayPayload::Text(value.to_string())
    }
}

impl From<Vec<u8>> for RelayPayload {
    fn from(value: Vec<u8>) -> Self {
        RelayPayload::Bytes(value)
    }
}

/// Injected at `init`: the span relay sends nest under, plus the telemetry sink.
#[derive(Clone)]
pub struct RelayContext {
    span: tracing::Span,
    sink: SharedSink,
}

impl std::fmt::Debug for RelayContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayContext").field("span", &self.span).finish_non_exhaustive()
    }
}

impl RelayContext {
    pub fn new(span: tracing::Span) -> Self {
        Self { span, sink: telemetry::null_sink() }
    }

    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn sink(&self) -> &SharedSink {
        &self.sink
    }

    /// Run one send inside a `relay` span, logging and reporting the outcome.
    pub async fn send<F>(&self, plugin: &'static str, destination: &str, bytes: usize, send: F) -> Result<(), RelayError>
    where
        F: Future<Output = Result<(), RelayError>>,
    {
        let span = tracing::info_span!(parent: &self.span, "relay", plugin, destination);
        let result = async {
            tracing::debug!(target: "fleetline::relay", bytes, "sending data to {destination}");
            send.await
        }
        .instrument(span)
        .await;

        match &result {
            Ok(()) => {
                telemetry::emit(&self.sink, FleetEvent::Relay(RelayEvent::Sent { plugin, bytes })).await;
            }
            Err(error) => {
                tracing::error!(target: "fleetline::relay", plugin, %error, "relay error");
                telemetry::emit(&self.sink, FleetEvent::Relay(RelayEvent::Failed { plugin })).await;
            }
        }
        result
    }
}

impl Default for RelayContext {
    fn default() -> Self {
        Self::new(tracing::Span::current())
    }
}

#[async_trait]
pub trait RelayPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Connect the underlying producer. Connection errors propagate unchanged.
    async fn init(&mut self, ctx: RelayContext) -> Result<(), RelayError>;

    async fn relay(&self, payload: RelayPayload) -> Result<(), RelayError>;
}

async fn announce(ctx: &RelayContext, plugin: &'static str) {
    telemetry::emit(ctx.sink(), FleetEvent::Relay(RelayEvent::Initialized { plugin })).await;
}

/// Writes every payload to the log.
#[derive(Debug, Default)]
pub struct LogRelay {
    ctx: Option<RelayContext>,
}

impl LogRelay {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RelayPlugin for LogRelay {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn init(&mut self, ctx: RelayContext) -> Result<(), RelayError> {
        tracing::info!(target: "fleetline::relay", plugin = self.name(), "relay initialized");
        announce(&ctx, "log").await;
        self.ctx = Some(ctx);
        Ok(())
    }

    async fn relay(&self, payload: RelayPayload) -> Result<(), RelayError> {
        let ctx = self.ctx.as_ref().ok_or(RelayError::NotInitialized)?;
        let bytes = payload.len();
        let text = payload.into_text();
        ctx.send("log", "log", bytes, async move {
            tracing::info!(target: "fleetline::relay", payload = %text, "relayed");
            Ok(())
        })
        .await
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    sent: Mutex<Vec<String>>,
    failing: std::sync::atomic::AtomicBool,
}

/// Captures payloads in memory. Clones share the captured list.
#[derive(Debug, Clone)]
pub struct MemoryRelay {
    inner: Arc<MemoryInner>,
    max_in_flight: u64,
    ctx: Option<RelayContext>,
}

impl MemoryRelay {
    /// Validates `max_in_flight` the way a networked relay would.
    pub fn new(max_in_flight: i64) -> Result<Self, RelayError> {
        let max_in_flight = require_positive("max_in_flight_requests", max_in_flight)?;
        Ok(Self { inner: Arc::default(), max_in_flight, ctx: None })
    }

    pub fn max_in_flight(&self) -> u64 {
        self.max_in_flight
    }

    pub fn sent(&self) -> Vec<String> {
        self.inner.sent.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Make subsequent sends fail.
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl RelayPlugin for MemoryRelay {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn init(&mut self, ctx: RelayContext) -> Result<(), RelayError> {
        announce(&ctx, "memory").await;
        self.ctx = Some(ctx);
        Ok(())
    }

    async fn relay(&self, payload: RelayPayload) -> Result<(), RelayError> {
        let ctx = self.ctx.as_ref().ok_or(RelayError::NotInitialized)?;
        let bytes = payload.len();
        let text = payload.into_text();
        let inner = self.inner.clone();
        ctx.send("memory", "memory", bytes, async move {
            if inner.failing.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(RelayError::Send("memory relay set to fail".into()));
            }
            inner.sent.lock().unwrap_or_else(|p| p.into_inner()).push(text);
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{shared, MemorySink};

    #[test]
    fn non_positive_tuning_is_rejected() {
        assert_eq!(
            MemoryRelay::new(0).unwrap_err(),
            RelayError::InvalidTuning { param: "max_in_flight_requests", value: 0 }
        );
        let err = MemoryRelay::new(-3).unwrap_err();
        assert!(err.is_construction());
        assert_eq!(err.to_string(), "Invalid or missing 'max_in_flight_requests': -3");
    }

    #[tokio::test]
    async fn bytes_are_relayed_as_text() {
        let mut relay = MemoryRelay::new(1).unwrap();
        relay.init(RelayContext::default()).await.unwrap();
        relay.relay(RelayPayload::from(b"{\"tx\":1}".to_vec())).await.unwrap();
        relay.relay("plain".into()).await.unwrap();
        assert_eq!(relay.sent(), vec!["{\"tx\":1}".to_string(), "plain".to_string()]);
    }

    #[tokio::test]
    async fn send_failures_are_returned_to_the_caller() {
        let memory = MemorySink::new();
        let mut relay = MemoryRelay::new(5).unwrap();
        relay.init(RelayContext::default().with_sink(shared(memory.clone()))).await.unwrap();
        relay.set_failing(true);

        let err = relay.relay("x".into()).await.unwrap_err();
        assert!(matches!(err, RelayError::Send(_)));
        assert!(!err.is_construction());
        assert_eq!(
            memory.events().last(),
            Some(&FleetEvent::Relay(RelayEvent::Failed { plugin: "memory" }))
        );
    }

    #[tokio::test]
    async fn relay_before_init_fails() {
        let relay = LogRelay::new();
        assert_eq!(relay.relay("x".into()).await, Err(RelayError::NotInitialized));
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        assert_eq!(RelayPayload::Bytes(vec![0x66, 0xff, 0x6f]).into_text(), "f\u{fffd}o");
    }
}
