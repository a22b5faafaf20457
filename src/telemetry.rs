//! Structured lifecycle events for the fleet runtime.
//!
//! Components report through a [`SharedSink`] handed to them at construction. Sinks are
//! `tower::Service<FleetEvent>` implementations, so anything that can be expressed as a
//! tower service (buffering, fan-out, forwarding to an external system) can sit behind
//! the handle. Emission is best-effort: a failing sink never fails the caller. Sinks are
//! awaited inline on the emitting task, so they must not block; put slow consumers
//! behind a [`StreamingSink`].
//!
//! ```rust
//! use fleetline::telemetry::{shared, FleetEvent, MemorySink, ReloadEvent};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let memory = MemorySink::new();
//! let sink = shared(memory.clone());
//! fleetline::telemetry::emit(&sink, FleetEvent::Reload(ReloadEvent::PublishSkipped)).await;
//! assert_eq!(memory.len(), 1);
//! # });
//! ```

pub mod events;
pub mod sinks;

pub use events::{
    event_to_json, BootstrapEvent, FleetEvent, RelayEvent, ReloadEvent, TopologyEvent,
};
pub use sinks::{
    emit_best_effort, shared, LogSink, MemorySink, NullSink, SharedSink, StreamingSink,
    TelemetrySink,
};

/// Emit through a shared handle without consuming it.
pub async fn emit(sink: &SharedSink, event: FleetEvent) {
    emit_best_effort(sink.clone(), event).await;
}

/// Handle that discards everything; the default for components built without a sink.
pub fn null_sink() -> SharedSink {
    shared(NullSink)
}
