//! Authoritative configuration store contract.
//!
//! The store is the single source of truth for network maps, rule configs and typology
//! configs. Entity bodies are opaque JSON. Every mutation reports how many rows it
//! touched; the reload publisher keys off that count.

pub mod file;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

pub use file::JsonFileStore;

/// Tenant identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TenantId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TenantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Configuration entity families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    NetworkMap,
    RuleConfig,
    TypologyConfig,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] =
        [EntityKind::NetworkMap, EntityKind::RuleConfig, EntityKind::TypologyConfig];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::NetworkMap => "network_map",
            EntityKind::RuleConfig => "rule_config",
            EntityKind::TypologyConfig => "typology_config",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "network_map" => Ok(EntityKind::NetworkMap),
            "rule_config" => Ok(EntityKind::RuleConfig),
            "typology_config" => Ok(EntityKind::TypologyConfig),
            other => Err(format!("unknown entity kind {other:?}")),
        }
    }
}

/// Identity of a stored entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub tenant_id: TenantId,
    pub id: String,
    pub cfg: String,
}

/// One configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntity {
    pub kind: EntityKind,
    pub id: String,
    pub cfg: String,
    pub tenant_id: TenantId,
    pub body: serde_json::Value,
}

impl ConfigEntity {
    pub fn new(
        kind: EntityKind,
        tenant_id: impl Into<TenantId>,
        id: impl Into<String>,
        cfg: impl Into<String>,
        body: serde_json::Value,
    ) -> Self {
        Self { kind, id: id.into(), cfg: cfg.into(), tenant_id: tenant_id.into(), body }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey {
            kind: self.kind,
            tenant_id: self.tenant_id.clone(),
            id: self.id.clone(),
            cfg: self.cfg.clone(),
        }
    }
}

/// Outcome of a mutating store call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutation {
    pub kind: EntityKind,
    pub tenant_id: TenantId,
    pub rows_affected: u64,
}

impl Mutation {
    pub fn changed(&self) -> bool {
        self.rows_affected > 0
    }
}

/// Store failures. Recoverable: callers log them and keep their previous state.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store document is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Every tenant with at least one stored entity.
    async fn tenants(&self) -> Result<Vec<TenantId>, StoreError>;

    async fn list(&self, kind: EntityKind, tenant: &TenantId) -> Result<Vec<ConfigEntity>, StoreError>;

    async fn get(&self, key: &EntityKey) -> Result<Option<ConfigEntity>, StoreError>;

    /// Insert (or overwrite) an entity; always touches one row.
    async fn create(&self, entity: ConfigEntity) -> Result<Mutation, StoreError>;

    /// Replace the body of an existing entity; zero rows when it does not exist.
    async fn update(&self, entity: ConfigEntity) -> Result<Mutation, StoreError>;

    async fn remove(&self, key: &EntityKey) -> Result<Mutation, StoreError>;
}

/// Apply a mutation to an entity map. Shared by the in-memory and file stores.
pub(crate) fn apply(
    entities: &mut BTreeMap<EntityKey, ConfigEntity>,
    op: MutationOp,
) -> Mutation {
    let (kind, tenant_id, rows_affected) = match op {
        MutationOp::Create(entity) => {
            let (kind, tenant) = (entity.kind, entity.tenant_id.clone());
            entities.insert(entity.key(), entity);
            (kind, tenant, 1)
        }
        MutationOp::Update(entity) => {
            let (kind, tenant) = (entity.kind, entity.tenant_id.clone());
            match entities.get_mut(&entity.key()) {
                Some(existing) => {
                    existing.body = entity.body;
                    (kind, tenant, 1)
                }
                None => (kind, tenant, 0),
            }
        }
        MutationOp::Remove(key) => {
            let rows = u64::from(entities.remove(&key).is_some());
            (key.kind, key.tenant_id, rows)
        }
    };
    Mutation { kind, tenant_id, rows_affected }
}

pub(crate) enum MutationOp {
    Create(ConfigEntity),
    Update(ConfigEntity),
    Remove(EntityKey),
}

pub(crate) fn tenants_of(entities: &BTreeMap<EntityKey, ConfigEntity>) -> Vec<TenantId> {
    let mut tenants: Vec<TenantId> = entities.keys().map(|k| k.tenant_id.clone()).collect();
    tenants.sort();
    tenants.dedup();
    tenants
}

pub(crate) fn list_of(
    entities: &BTreeMap<EntityKey, ConfigEntity>,
    kind: EntityKind,
    tenant: &TenantId,
) -> Vec<ConfigEntity> {
    entities
        .values()
        .filter(|e| e.kind == kind && &e.tenant_id == tenant)
        .cloned()
        .collect()
}

#[derive(Debug, Default)]
struct MemoryInner {
    entities: RwLock<BTreeMap<EntityKey, ConfigEntity>>,
    unavailable: AtomicBool,
    reads: AtomicUsize,
}

/// Process-local store for tests and offline runs. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryConfigStore {
    inner: Arc<MemoryInner>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with [`StoreError::Unavailable`] while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `list` calls served.
    pub fn reads(&self) -> usize {
        self.inner.reads.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store marked unavailable".into()));
        }
        Ok(())
    }

    fn mutate(&self, op: MutationOp) -> Result<Mutation, StoreError> {
        self.check()?;
        let mut entities = self.inner.entities.write().unwrap_or_else(|p| p.into_inner());
        Ok(apply(&mut entities, op))
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn tenants(&self) -> Result<Vec<TenantId>, StoreError> {
        self.check()?;
        let entities = self.inner.entities.read().unwrap_or_else(|p| p.into_inner());
        Ok(tenants_of(&entities))
    }

    async fn list(&self, kind: EntityKind, tenant: &TenantId) -> Result<Vec<ConfigEntity>, StoreError> {
        self.check()?;
        self.inner.reads.fetch_add(1, Ordering::SeqCst);
        let entities = self.inner.entities.read().unwrap_or_else(|p| p.into_inner());
        Ok(list_of(&entities, kind, tenant))
    }

    async fn get(&self, key: &EntityKey) -> Result<Option<ConfigEntity>, StoreError> {
        self.check()?;
        let entities = self.inner.entities.read().unwrap_or_else(|p| p.into_inner());
        Ok(entities.get(key).cloned())
    }

    async fn create(&self, entity: ConfigEntity) -> Result<Mutation, StoreError> {
        self.mutate(MutationOp::Create(entity))
    }

    async fn update(&self, entity: ConfigEntity) -> Result<Mutation, StoreError> {
        self.mutate(MutationOp::Update(entity))
    }

    async fn remove(&self, key: &EntityKey) -> Result<Mutation, StoreError> {
        self.mutate(MutationOp::Remove(key.clone()))
    }
}
