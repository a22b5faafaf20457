use serde::{Deserialize, Serialize};

use super::{CommandFailure, CommandMeta, CommandResult, ConfigCommand, ControlPlane, ListQuery};
use crate::store::{ConfigEntity, EntityKey, EntityKind, TenantId};

/// Canonical wire envelope exchanged by control-plane transports.
///
/// `cmd` is the verb (`list`, `get`, `create`, `update`, `remove`); `args` carries
/// `kind` plus the verb's fields (`id`, `cfg`, `body`, `offset`, `limit`, `filter`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TransportEnvelope {
    pub id: String,
    pub tenant: String,
    pub cmd: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default)]
    pub principal: Option<String>,
}

#[derive(Deserialize)]
struct KeyArgs {
    kind: EntityKind,
    id: String,
    cfg: String,
}

#[derive(Deserialize)]
struct EntityArgs {
    kind: EntityKind,
    id: String,
    cfg: String,
    #[serde(default)]
    body: serde_json::Value,
}

#[derive(Deserialize)]
struct ListArgs {
    kind: EntityKind,
    #[serde(flatten)]
    query: ListQuery,
}

/// Reply frame.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TransportReply {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<CommandResult>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl TransportEnvelope {
    pub fn decode(raw: &[u8]) -> Result<Self, TransportError> {
        Ok(serde_json::from_slice(raw)?)
    }

    /// Map the envelope onto a typed command.
    pub fn to_command(&self) -> Result<ConfigCommand, CommandFailure> {
        let tenant = TenantId::from(self.tenant.as_str());
        if tenant.as_str().is_empty() {
            return Err(CommandFailure::InvalidArgs { msg: "tenant is required".into() });
        }
        let invalid = |e: serde_json::Error| CommandFailure::InvalidArgs { msg: format!("{}: {e}", self.cmd) };
        let args = self.args.clone();
        match self.cmd.as_str() {
            "list" => {
                let ListArgs { kind, query } = serde_json::from_value(args).map_err(invalid)?;
                Ok(ConfigCommand::List { kind, tenant, query })
            }
            "get" | "remove" => {
                let KeyArgs { kind, id, cfg } = serde_json::from_value(args).map_err(invalid)?;
                let key = EntityKey { kind, tenant_id: tenant, id, cfg };
                Ok(if self.cmd == "get" { ConfigCommand::Get { key } } else { ConfigCommand::Remove { key } })
            }
            "create" | "update" => {
                let EntityArgs { kind, id, cfg, body } = serde_json::from_value(args).map_err(invalid)?;
                let entity = ConfigEntity::new(kind, tenant, id, cfg, body);
                Ok(if self.cmd == "create" {
                    ConfigCommand::Create { entity }
                } else {
                    ConfigCommand::Update { entity }
                })
            }
            other => Err(CommandFailure::InvalidArgs { msg: format!("unknown command {other:?}") }),
        }
    }

    pub fn meta(&self) -> CommandMeta {
        CommandMeta::new(self.id.clone())
    }
}

impl TransportReply {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_else(|e| {
            format!(r#"{{"id":{:?},"error":"reply encoding failed: {}"}}"#, self.id, e).into_bytes()
        })
    }
}

/// Decode one frame, execute it, and encode the reply. Never fails: problems are
/// reported inside the reply.
pub async fn handle_frame(plane: &ControlPlane, raw: &[u8]) -> Vec<u8> {
    let envelope = match TransportEnvelope::decode(raw) {
        Ok(env) => env,
        Err(e) => {
            tracing::warn!(target: "fleetline::control", error = %e, "rejected control frame");
            return TransportReply { id: String::new(), result: None, error: Some(e.to_string()) }.encode();
        }
    };
    let reply = match envelope.to_command() {
        Err(failure) => TransportReply {
            id: envelope.id.clone(),
            result: Some(CommandResult::Error(failure)),
            error: None,
        },
        Ok(cmd) => {
            let principal = envelope.principal.as_deref().unwrap_or("anonymous");
            match plane.execute(envelope.meta(), principal, cmd).await {
                Ok(result) => TransportReply { id: envelope.id.clone(), result: Some(result), error: None },
                Err(e) => TransportReply { id: envelope.id.clone(), result: None, error: Some(e.to_string()) },
            }
        }
    };
    reply.encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(cmd: &str, args: serde_json::Value) -> TransportEnvelope {
        TransportEnvelope { id: "req-1".into(), tenant: "tenant-a".into(), cmd: cmd.into(), args, principal: None }
    }

    #[test]
    fn create_maps_to_entity() {
        let env = envelope("create", json!({ "kind": "rule_config", "id": "901", "cfg": "1.0.0", "body": { "ruleActive": true } }));
        match env.to_command().unwrap() {
            ConfigCommand::Create { entity } => {
                assert_eq!(entity.kind, EntityKind::RuleConfig);
                assert_eq!(entity.tenant_id, TenantId::from("tenant-a"));
                assert_eq!(entity.body["ruleActive"], true);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn list_defaults_paging() {
        let env = envelope("list", json!({ "kind": "typology_config" }));
        match env.to_command().unwrap() {
            ConfigCommand::List { query, .. } => assert_eq!(query, ListQuery::default()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bad_frames_are_invalid_args() {
        assert!(matches!(
            envelope("explode", json!({})).to_command(),
            Err(CommandFailure::InvalidArgs { .. })
        ));
        assert!(matches!(
            envelope("get", json!({ "kind": "rules", "id": "1", "cfg": "1" })).to_command(),
            Err(CommandFailure::InvalidArgs { .. })
        ));
        let mut no_tenant = envelope("get", json!({ "kind": "rule_config", "id": "1", "cfg": "1" }));
        no_tenant.tenant.clear();
        assert!(no_tenant.to_command().is_err());
    }

    #[test]
    fn envelope_decodes_from_json() {
        let raw = br#"{"id":"7","tenant":"t","cmd":"remove","args":{"kind":"network_map","id":"default","cfg":"1.0.0"}}"#;
        let env = TransportEnvelope::decode(raw).unwrap();
        assert_eq!(env.id, "7");
        assert!(matches!(env.to_command(), Ok(ConfigCommand::Remove { .. })));
        assert!(TransportEnvelope::decode(b"nope").is_err());
    }
}
