use crate::store::{EntityKind, TenantId};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message carried on the reload channel.
///
/// Both variants mean "re-read everything in scope"; the entity and tenant of a
/// [`ReloadNotification::Reload`] are informational.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadNotification {
    Reload { entity: EntityKind, tenant: TenantId },
    /// Free-form payload, including anything that is not a structured notification.
    Ping(String),
}

#[derive(Serialize, Deserialize)]
struct WireReload {
    id: uuid::Uuid,
    entity: EntityKind,
    tenant: TenantId,
    at: String,
}

impl ReloadNotification {
    /// The generic signal, worded the way operators expect to see it in channel dumps.
    pub fn ping_now() -> Self {
        ReloadNotification::Ping(format!(
            "Configuration updated at {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
        ))
    }

    pub fn encode(&self) -> String {
        match self {
            ReloadNotification::Reload { entity, tenant } => {
                let wire = WireReload {
                    id: uuid::Uuid::new_v4(),
                    entity: *entity,
                    tenant: tenant.clone(),
                    at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                };
                serde_json::to_string(&wire).unwrap_or_else(|_| format!("{entity} {tenant}"))
            }
            ReloadNotification::Ping(text) => text.clone(),
        }
    }

    /// Never fails: unrecognised payloads become [`ReloadNotification::Ping`].
    pub fn decode(payload: &str) -> Self {
        match serde_json::from_str::<WireReload>(payload) {
            Ok(wire) => ReloadNotification::Reload { entity: wire.entity, tenant: wire.tenant },
            Err(_) => ReloadNotification::Ping(payload.to_string()),
        }
    }
}

impl fmt::Display for ReloadNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReloadNotification::Reload { entity, tenant } => write!(f, "reload({entity}, {tenant})"),
            ReloadNotification::Ping(text) => write!(f, "ping({text})"),
        }
    }
}
