//! Unified error type and the fatal / recoverable / per-call taxonomy.
//!
//! Each component owns its error enum; [`FleetError`] collects them so the service binary
//! can decide between exiting and carrying on with a single `class()` check.

use crate::bootstrap::BootstrapError;
use crate::config::ConfigError;
use crate::control::CommandError;
use crate::relay::RelayError;
use crate::reload::ChannelError;
use crate::store::StoreError;
use crate::topology::TopologyError;

/// How an error affects the lifetime of the process that observed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Log and terminate with a non-zero exit status.
    FatalStartup,
    /// Log, keep previous state, keep running.
    Recoverable,
    /// Log and hand back to the immediate caller.
    PerCall,
}

/// Any error surfaced by the fleet runtime.
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error(transparent)]
    Command(#[from] CommandError),
}

impl FleetError {
    pub fn class(&self) -> ErrorClass {
        match self {
            FleetError::Config(_) | FleetError::Bootstrap(_) | FleetError::Topology(_) => {
                ErrorClass::FatalStartup
            }
            FleetError::Store(_) | FleetError::Channel(_) => ErrorClass::Recoverable,
            FleetError::Relay(e) if e.is_construction() => ErrorClass::FatalStartup,
            FleetError::Relay(_) | FleetError::Command(_) => ErrorClass::PerCall,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::FatalStartup
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_follow_taxonomy() {
        let fatal: FleetError =
            BootstrapError::Exhausted { attempts: 10, last_error: "refused".into() }.into();
        assert!(fatal.is_fatal());

        let degraded: FleetError = TopologyError::AllSlotsDegraded { slots: 3 }.into();
        assert_eq!(degraded.class(), ErrorClass::FatalStartup);

        let reload: FleetError = StoreError::Unavailable("db down".into()).into();
        assert_eq!(reload.class(), ErrorClass::Recoverable);

        let publish: FleetError = ChannelError::Publish("broken pipe".into()).into();
        assert_eq!(publish.class(), ErrorClass::Recoverable);

        let send: FleetError = RelayError::Send("timeout".into()).into();
        assert_eq!(send.class(), ErrorClass::PerCall);

        let tuning: FleetError =
            RelayError::InvalidTuning { param: "max_in_flight_requests", value: 0 }.into();
        assert_eq!(tuning.class(), ErrorClass::FatalStartup);
    }

    #[test]
    fn display_is_transparent() {
        let err: FleetError = ConfigError::Missing("TRANSPORT_URL").into();
        assert_eq!(err.to_string(), "missing required setting TRANSPORT_URL");
    }
}
