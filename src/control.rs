//! Control plane: configuration commands, history and audit.
//!
//! Every mutating command goes store first, reload publisher second. The publish is
//! fire-and-forget, so a command's result reflects the store outcome only; the
//! `published` flag on [`CommandResult::Mutated`] says whether a reload signal went out.
//! Transports decode their frames into [`ConfigCommand`]s (see [`transport`]).

pub mod transport;

use crate::reload::{PublishOutcome, ReloadPublisher};
use crate::store::{ConfigEntity, ConfigStore, EntityKey, EntityKind, Mutation, StoreError, TenantId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Opaque command identifier.
pub type CommandId = String;

/// Execution metadata attached to each command.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CommandMeta {
    pub id: CommandId,
    pub correlation_id: Option<String>,
    pub timestamp_millis: Option<u128>,
}

impl CommandMeta {
    pub fn new(id: impl Into<CommandId>) -> Self {
        Self { id: id.into(), correlation_id: None, timestamp_millis: None }
    }
}

/// Paging and filtering for `List`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "ListQuery::default_limit")]
    pub limit: usize,
    /// Keep entities whose body has `field == value` (string comparison).
    #[serde(default)]
    pub filter: Option<(String, String)>,
}

impl ListQuery {
    fn default_limit() -> usize {
        100
    }
}

impl Default for ListQuery {
    fn default() -> Self {
        Self { offset: 0, limit: Self::default_limit(), filter: None }
    }
}

/// Tenant-scoped configuration command.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigCommand {
    List { kind: EntityKind, tenant: TenantId, query: ListQuery },
    Get { key: EntityKey },
    Create { entity: ConfigEntity },
    Update { entity: ConfigEntity },
    Remove { key: EntityKey },
}

impl ConfigCommand {
    /// Stable label used in history and audit records, e.g. `update_rule_config`.
    pub fn label(&self) -> String {
        let (verb, kind) = match self {
            ConfigCommand::List { kind, .. } => ("list", *kind),
            ConfigCommand::Get { key } => ("get", key.kind),
            ConfigCommand::Create { entity } => ("create", entity.kind),
            ConfigCommand::Update { entity } => ("update", entity.kind),
            ConfigCommand::Remove { key } => ("remove", key.kind),
        };
        format!("{verb}_{kind}")
    }

    pub fn tenant(&self) -> &TenantId {
        match self {
            ConfigCommand::List { tenant, .. } => tenant,
            ConfigCommand::Get { key } | ConfigCommand::Remove { key } => &key.tenant_id,
            ConfigCommand::Create { entity } | ConfigCommand::Update { entity } => &entity.tenant_id,
        }
    }
}

/// Errors returned by command handling.
#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("audit: {0}")]
    Audit(String),
}

/// Structured command failure payload.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandFailure {
    InvalidArgs { msg: String },
    NotFound { what: String },
    Internal { msg: String },
}

impl std::fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandFailure::InvalidArgs { msg } => write!(f, "{msg}"),
            CommandFailure::NotFound { what } => write!(f, "{what} not found"),
            CommandFailure::Internal { msg } => write!(f, "{msg}"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CommandResult {
    Entity(ConfigEntity),
    List { data: Vec<ConfigEntity>, total: usize },
    Mutated { rows_affected: u64, published: bool },
    Error(CommandFailure),
}

/// Audit record emitted after command execution.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AuditRecord {
    pub id: CommandId,
    pub label: String,
    pub principal: String,
    pub tenant: TenantId,
    pub status: String,
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord) -> Result<(), CommandError>;
}

/// Logs audit records under the `fleetline::audit` target.
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<(), CommandError> {
        info!(
            target: "fleetline::audit",
            id = %record.id,
            label = %record.label,
            principal = %record.principal,
            tenant = %record.tenant,
            status = %record.status,
            "audit"
        );
        Ok(())
    }
}

/// In-memory audit sink (tests/diagnostics).
#[derive(Default)]
pub struct MemoryAuditSink {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<(), CommandError> {
        self.records.lock().await.push(record);
        Ok(())
    }
}

/// Pluggable record of executed commands.
#[async_trait]
pub trait CommandHistory: Send + Sync {
    async fn append(&self, meta: &CommandMeta, label: &str, result: &CommandResult);
    async fn list(&self) -> Vec<(CommandMeta, String)>;
    async fn clear(&self);
}

/// Bounded in-memory history; the oldest entry is dropped past capacity.
#[derive(Clone)]
pub struct InMemoryHistory {
    entries: Arc<Mutex<Vec<(CommandMeta, String)>>>,
    capacity: usize,
}

impl InMemoryHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { entries: Arc::default(), capacity: capacity.max(1) }
    }
}

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::with_capacity(1_000)
    }
}

#[async_trait]
impl CommandHistory for InMemoryHistory {
    async fn append(&self, meta: &CommandMeta, label: &str, _result: &CommandResult) {
        let mut entries = self.entries.lock().await;
        if entries.len() >= self.capacity {
            entries.remove(0);
        }
        entries.push((meta.clone(), label.to_string()));
    }

    async fn list(&self) -> Vec<(CommandMeta, String)> {
        self.entries.lock().await.clone()
    }

    async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

/// Executes configuration commands against the store and signals reloads.
pub struct ControlPlane {
    store: Arc<dyn ConfigStore>,
    publisher: ReloadPublisher,
    history: Arc<dyn CommandHistory>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl ControlPlane {
    pub fn new(store: Arc<dyn ConfigStore>, publisher: ReloadPublisher) -> Self {
        Self { store, publisher, history: Arc::new(InMemoryHistory::default()), audit: None }
    }

    pub fn with_history(mut self, history: Arc<dyn CommandHistory>) -> Self {
        self.history = history;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn history(&self) -> Arc<dyn CommandHistory> {
        self.history.clone()
    }

    /// Run one command (store -> publish -> history/audit).
    ///
    /// Store failures come back as `Err`; lookups that find nothing come back as
    /// `Ok(CommandResult::Error(NotFound))`.
    pub async fn execute(
        &self,
        meta: CommandMeta,
        principal: &str,
        cmd: ConfigCommand,
    ) -> Result<CommandResult, CommandError> {
        let label = cmd.label();
        let tenant = cmd.tenant().clone();
        let outcome = self.dispatch(cmd).await;

        let status = match &outcome {
            Ok(CommandResult::Error(failure)) => format!("error: {failure}"),
            Ok(_) => "ok".into(),
            Err(e) => format!("failed: {e}"),
        };
        if let Ok(result) = &outcome {
            self.history.append(&meta, &label, result).await;
        }
        if let Some(sink) = &self.audit {
            sink.record(AuditRecord {
                id: meta.id.clone(),
                label,
                principal: principal.to_string(),
                tenant,
                status,
            })
            .await?;
        }
        outcome
    }

    async fn dispatch(&self, cmd: ConfigCommand) -> Result<CommandResult, CommandError> {
        match cmd {
            ConfigCommand::List { kind, tenant, query } => {
                let mut data = self.store.list(kind, &tenant).await?;
                if let Some((field, value)) = &query.filter {
                    data.retain(|e| body_field(&e.body, field).as_deref() == Some(value.as_str()));
                }
                data.sort_by(|a, b| a.cfg.cmp(&b.cfg).then_with(|| a.id.cmp(&b.id)));
                let total = data.len();
                let data = data.into_iter().skip(query.offset).take(query.limit).collect();
                Ok(CommandResult::List { data, total })
            }
            ConfigCommand::Get { key } => Ok(match self.store.get(&key).await? {
                Some(entity) => CommandResult::Entity(entity),
                None => CommandResult::Error(CommandFailure::NotFound { what: describe(&key) }),
            }),
            ConfigCommand::Create { entity } => {
                if entity.kind == EntityKind::NetworkMap {
                    // A network map with the same name and cfg is replaced, not duplicated.
                    self.store.remove(&entity.key()).await?;
                }
                let mutation = self.store.create(entity).await?;
                Ok(self.mutated(mutation).await)
            }
            ConfigCommand::Update { entity } => {
                let mutation = self.store.update(entity).await?;
                Ok(self.mutated(mutation).await)
            }
            ConfigCommand::Remove { key } => {
                let mutation = self.store.remove(&key).await?;
                Ok(self.mutated(mutation).await)
            }
        }
    }

    async fn mutated(&self, mutation: Mutation) -> CommandResult {
        let published = self.publisher.after_mutation(&mutation).await == PublishOutcome::Published;
        CommandResult::Mutated { rows_affected: mutation.rows_affected, published }
    }
}

fn body_field(body: &serde_json::Value, field: &str) -> Option<String> {
    match body.get(field)? {
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn describe(key: &EntityKey) -> String {
    format!("{} {}@{} for tenant {}", key.kind, key.id, key.cfg, key.tenant_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reload::InMemoryBus;
    use crate::store::InMemoryConfigStore;
    use serde_json::json;

    fn plane(store: &InMemoryConfigStore, bus: &InMemoryBus) -> ControlPlane {
        ControlPlane::new(
            Arc::new(store.clone()),
            ReloadPublisher::new(Arc::new(bus.clone()), "config:reload"),
        )
    }

    fn network_map(tenant: &str, active: bool) -> ConfigEntity {
        ConfigEntity::new(EntityKind::NetworkMap, tenant, "default", "1.0.0", json!({ "active": active }))
    }

    #[tokio::test]
    async fn failed_publish_keeps_the_mutation() {
        let store = InMemoryConfigStore::new();
        store.create(network_map("t", true)).await.unwrap();
        let bus = InMemoryBus::new();
        bus.fail_publish(true);
        let plane = plane(&store, &bus);

        let res = plane
            .execute(CommandMeta::new("1"), "ops", ConfigCommand::Update { entity: network_map("t", false) })
            .await
            .unwrap();
        assert_eq!(res, CommandResult::Mutated { rows_affected: 1, published: false });

        let stored = store.get(&network_map("t", false).key()).await.unwrap().unwrap();
        assert_eq!(stored.body["active"], false);
    }

    #[test]
    fn labels_combine_verb_and_kind() {
        let cmd = ConfigCommand::Update { entity: network_map("t", true) };
        assert_eq!(cmd.label(), "update_network_map");
        assert_eq!(cmd.tenant(), &TenantId::from("t"));
    }

    #[tokio::test]
    async fn network_map_create_replaces_existing() {
        let store = InMemoryConfigStore::new();
        let bus = InMemoryBus::new();
        let plane = plane(&store, &bus);

        plane.execute(CommandMeta::new("1"), "ops", ConfigCommand::Create { entity: network_map("t", true) }).await.unwrap();
        let res = plane
            .execute(CommandMeta::new("2"), "ops", ConfigCommand::Create { entity: network_map("t", false) })
            .await
            .unwrap();
        assert_eq!(res, CommandResult::Mutated { rows_affected: 1, published: true });

        let listed = plane
            .execute(
                CommandMeta::new("3"),
                "ops",
                ConfigCommand::List { kind: EntityKind::NetworkMap, tenant: TenantId::from("t"), query: ListQuery::default() },
            )
            .await
            .unwrap();
        match listed {
            CommandResult::List { data, total } => {
                assert_eq!(total, 1);
                assert_eq!(data[0].body["active"], false);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn update_of_missing_entity_does_not_publish() {
        let store = InMemoryConfigStore::new();
        let bus = InMemoryBus::new();
        let plane = plane(&store, &bus);
        let res = plane
            .execute(CommandMeta::new("1"), "ops", ConfigCommand::Update { entity: network_map("t", true) })
            .await
            .unwrap();
        assert_eq!(res, CommandResult::Mutated { rows_affected: 0, published: false });
    }

    #[tokio::test]
    async fn get_missing_is_not_found_and_audited() {
        let store = InMemoryConfigStore::new();
        let bus = InMemoryBus::new();
        let audit = Arc::new(MemoryAuditSink::new());
        let plane = plane(&store, &bus).with_audit(audit.clone());

        let res = plane
            .execute(CommandMeta::new("9"), "alice", ConfigCommand::Get { key: network_map("t", true).key() })
            .await
            .unwrap();
        assert!(matches!(res, CommandResult::Error(CommandFailure::NotFound { .. })));

        let records = audit.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].principal, "alice");
        assert!(records[0].status.starts_with("error:"));
        assert_eq!(plane.history().list().await.len(), 1);
    }

    #[tokio::test]
    async fn list_filters_and_pages() {
        let store = InMemoryConfigStore::new();
        let bus = InMemoryBus::new();
        let plane = plane(&store, &bus);
        for (cfg, active) in [("1.0.0", true), ("2.0.0", false), ("3.0.0", true)] {
            let entity = ConfigEntity::new(EntityKind::RuleConfig, "t", "901", cfg, json!({ "ruleActive": active }));
            store.create(entity).await.unwrap();
        }
        let query = ListQuery { offset: 1, limit: 10, filter: Some(("ruleActive".into(), "true".into())) };
        let res = plane
            .execute(
                CommandMeta::new("1"),
                "ops",
                ConfigCommand::List { kind: EntityKind::RuleConfig, tenant: TenantId::from("t"), query },
            )
            .await
            .unwrap();
        match res {
            CommandResult::List { data, total } => {
                assert_eq!(total, 2);
                assert_eq!(data.len(), 1);
                assert_eq!(data[0].cfg, "3.0.0");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn store_outage_is_an_error() {
        let store = InMemoryConfigStore::new();
        let bus = InMemoryBus::new();
        let plane = plane(&store, &bus);
        store.set_unavailable(true);
        let err = plane
            .execute(CommandMeta::new("1"), "ops", ConfigCommand::Remove { key: network_map("t", true).key() })
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Store(StoreError::Unavailable(_))));
    }
}
