use serde_json::json;
use std::fmt;
use std::time::Duration;

/// Lifecycle events emitted by the fleet runtime.
///
/// Every component that matters for "did the fleet converge?" reports through this type:
/// the bootstrapper, the supervisor, the reload publisher/subscriber, and relay plugins.
#[derive(Debug, Clone, PartialEq)]
pub enum FleetEvent {
    /// Transport bootstrap events
    Bootstrap(BootstrapEvent),
    /// Primary/worker supervision events
    Topology(TopologyEvent),
    /// Reload publish and apply events
    Reload(ReloadEvent),
    /// Relay plugin events
    Relay(RelayEvent),
}

/// Events emitted while attaching to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapEvent {
    /// An attempt failed; `next_delay` is `None` when it was the last one.
    AttemptFailed { attempt: usize, max_attempts: usize, next_delay: Option<Duration> },
    /// The transport accepted the connection.
    Connected { attempt: usize },
    /// Every attempt failed.
    Exhausted { attempts: usize },
    /// Offline mode: bootstrap was not attempted.
    Skipped,
}

/// Events emitted by the primary's supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyEvent {
    WorkerStarted { slot: usize, pid: u32 },
    WorkerExited { slot: usize, pid: u32, code: Option<i32> },
    /// A replacement for `slot` will be spawned after `delay`.
    RestartScheduled { slot: usize, delay: Duration, restarts: usize },
    /// `slot` exhausted its restart budget and will not be respawned.
    SlotDegraded { slot: usize, restarts: usize },
}

/// Events emitted by the reload publisher and subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadEvent {
    Published { channel: String },
    /// Mutation touched no rows; nothing was sent.
    PublishSkipped,
    PublishFailed { channel: String },
    Subscribed { channel: String },
    SubscribeFailed { channel: String },
    /// A new snapshot replaced the previous one.
    Applied { generation: u64, tenants: usize },
    /// Reload fetch failed; `retained` is the generation still being served.
    Failed { retained: u64 },
}

/// Events emitted by relay plugins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Initialized { plugin: &'static str },
    Sent { plugin: &'static str, bytes: usize },
    Failed { plugin: &'static str },
}

impl fmt::Display for FleetEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FleetEvent::Bootstrap(event) => write!(f, "Bootstrap::{}", event),
            FleetEvent::Topology(event) => write!(f, "Topology::{}", event),
            FleetEvent::Reload(event) => write!(f, "Reload::{}", event),
            FleetEvent::Relay(event) => write!(f, "Relay::{}", event),
        }
    }
}

impl fmt::Display for BootstrapEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapEvent::AttemptFailed { attempt, max_attempts, next_delay: Some(delay) } => {
                write!(f, "AttemptFailed(#{}/{}, retry_in={:?})", attempt, max_attempts, delay)
            }
            BootstrapEvent::AttemptFailed { attempt, max_attempts, next_delay: None } => {
                write!(f, "AttemptFailed(#{}/{}, final)", attempt, max_attempts)
            }
            BootstrapEvent::Connected { attempt } => write!(f, "Connected(#{})", attempt),
            BootstrapEvent::Exhausted { attempts } => write!(f, "Exhausted(attempts={})", attempts),
            BootstrapEvent::Skipped => write!(f, "Skipped"),
        }
    }
}

impl fmt::Display for TopologyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyEvent::WorkerStarted { slot, pid } => {
                write!(f, "WorkerStarted(slot={}, pid={})", slot, pid)
            }
            TopologyEvent::WorkerExited { slot, pid, code: Some(code) } => {
                write!(f, "WorkerExited(slot={}, pid={}, code={})", slot, pid, code)
            }
            TopologyEvent::WorkerExited { slot, pid, code: None } => {
                write!(f, "WorkerExited(slot={}, pid={}, signal)", slot, pid)
            }
            TopologyEvent::RestartScheduled { slot, delay, restarts } => {
                write!(f, "RestartScheduled(slot={}, delay={:?}, restarts={})", slot, delay, restarts)
            }
            TopologyEvent::SlotDegraded { slot, restarts } => {
                write!(f, "SlotDegraded(slot={}, restarts={})", slot, restarts)
            }
        }
    }
}

impl fmt::Display for ReloadEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReloadEvent::Published { channel } => write!(f, "Published({})", channel),
            ReloadEvent::PublishSkipped => write!(f, "PublishSkipped"),
            ReloadEvent::PublishFailed { channel } => write!(f, "PublishFailed({})", channel),
            ReloadEvent::Subscribed { channel } => write!(f, "Subscribed({})", channel),
            ReloadEvent::SubscribeFailed { channel } => write!(f, "SubscribeFailed({})", channel),
            ReloadEvent::Applied { generation, tenants } => {
                write!(f, "Applied(generation={}, tenants={})", generation, tenants)
            }
            ReloadEvent::Failed { retained } => write!(f, "Failed(retained={})", retained),
        }
    }
}

impl fmt::Display for RelayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayEvent::Initialized { plugin } => write!(f, "Initialized({})", plugin),
            RelayEvent::Sent { plugin, bytes } => write!(f, "Sent({}, bytes={})", plugin, bytes),
            RelayEvent::Failed { plugin } => write!(f, "Failed({})", plugin),
        }
    }
}

fn clamp_u64(val: u128) -> u64 {
    u64::try_from(val).unwrap_or(u64::MAX)
}

/// Render an event as a flat JSON object with a `kind` discriminator.
pub fn event_to_json(event: &FleetEvent) -> serde_json::Value {
    match event {
        FleetEvent::Bootstrap(b) => match b {
            BootstrapEvent::AttemptFailed { attempt, max_attempts, next_delay } => json!({
                "kind": "bootstrap_attempt_failed",
                "attempt": *attempt,
                "max_attempts": *max_attempts,
                "next_delay_ms": next_delay.map(|d| clamp_u64(d.as_millis())),
            }),
            BootstrapEvent::Connected { attempt } => {
                json!({ "kind": "bootstrap_connected", "attempt": *attempt })
            }
            BootstrapEvent::Exhausted { attempts } => {
                json!({ "kind": "bootstrap_exhausted", "attempts": *attempts })
            }
            BootstrapEvent::Skipped => json!({ "kind": "bootstrap_skipped" }),
        },
        FleetEvent::Topology(t) => match t {
            TopologyEvent::WorkerStarted { slot, pid } => {
                json!({ "kind": "worker_started", "slot": *slot, "pid": *pid })
            }
            TopologyEvent::WorkerExited { slot, pid, code } => {
                json!({ "kind": "worker_exited", "slot": *slot, "pid": *pid, "code": *code })
            }
            TopologyEvent::RestartScheduled { slot, delay, restarts } => json!({
                "kind": "restart_scheduled",
                "slot": *slot,
                "delay_ms": clamp_u64(delay.as_millis()),
                "restarts": *restarts,
            }),
            TopologyEvent::SlotDegraded { slot, restarts } => {
                json!({ "kind": "slot_degraded", "slot": *slot, "restarts": *restarts })
            }
        },
        FleetEvent::Reload(r) => match r {
            ReloadEvent::Published { channel } => {
                json!({ "kind": "reload_published", "channel": channel })
            }
            ReloadEvent::PublishSkipped => json!({ "kind": "reload_publish_skipped" }),
            ReloadEvent::PublishFailed { channel } => {
                json!({ "kind": "reload_publish_failed", "channel": channel })
            }
            ReloadEvent::Subscribed { channel } => {
                json!({ "kind": "reload_subscribed", "channel": channel })
            }
            ReloadEvent::SubscribeFailed { channel } => {
                json!({ "kind": "reload_subscribe_failed", "channel": channel })
            }
            ReloadEvent::Applied { generation, tenants } => json!({
                "kind": "reload_applied",
                "generation": *generation,
                "tenants": *tenants,
            }),
            ReloadEvent::Failed { retained } => {
                json!({ "kind": "reload_failed", "retained": *retained })
            }
        },
        FleetEvent::Relay(r) => match r {
            RelayEvent::Initialized { plugin } => {
                json!({ "kind": "relay_initialized", "plugin": plugin })
            }
            RelayEvent::Sent { plugin, bytes } => {
                json!({ "kind": "relay_sent", "plugin": plugin, "bytes": *bytes })
            }
            RelayEvent::Failed { plugin } => json!({ "kind": "relay_failed", "plugin": plugin }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_attempt_json() {
        let v = event_to_json(&FleetEvent::Bootstrap(BootstrapEvent::AttemptFailed {
            attempt: 3,
            max_attempts: 10,
            next_delay: Some(Duration::from_secs(5)),
        }));
        assert_eq!(v["kind"], "bootstrap_attempt_failed");
        assert_eq!(v["attempt"], 3);
        assert_eq!(v["next_delay_ms"], 5000);

        let last = event_to_json(&FleetEvent::Bootstrap(BootstrapEvent::AttemptFailed {
            attempt: 10,
            max_attempts: 10,
            next_delay: None,
        }));
        assert!(last["next_delay_ms"].is_null());
    }

    #[test]
    fn worker_exit_json_keeps_signal_as_null() {
        let v = event_to_json(&FleetEvent::Topology(TopologyEvent::WorkerExited {
            slot: 2,
            pid: 4242,
            code: None,
        }));
        assert_eq!(v["kind"], "worker_exited");
        assert_eq!(v["slot"], 2);
        assert!(v["code"].is_null());
    }

    #[test]
    fn reload_applied_json() {
        let v = event_to_json(&FleetEvent::Reload(ReloadEvent::Applied { generation: 7, tenants: 2 }));
        assert_eq!(v["kind"], "reload_applied");
        assert_eq!(v["generation"], 7);
        assert_eq!(v["tenants"], 2);
    }

    #[test]
    fn display_prefixes_component() {
        let event = FleetEvent::Topology(TopologyEvent::SlotDegraded { slot: 1, restarts: 5 });
        assert_eq!(event.to_string(), "Topology::SlotDegraded(slot=1, restarts=5)");
        let relay = FleetEvent::Relay(RelayEvent::Sent { plugin: "kafka", bytes: 12 });
        assert!(relay.to_string().contains("bytes=12"));
    }
}
