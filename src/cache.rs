//! In-process configuration cache.
//!
//! Readers call [`ConfigurationCache::current`] and get an `Arc` to a complete snapshot;
//! a reload builds the next snapshot off to the side and swaps it in with one atomic
//! store. A failed reload leaves the published snapshot untouched.

use crate::store::{ConfigEntity, ConfigStore, EntityKey, EntityKind, StoreError, TenantId};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Every entity of one tenant, grouped by kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TenantConfig {
    entities: BTreeMap<EntityKind, Vec<ConfigEntity>>,
}

impl TenantConfig {
    pub fn entities(&self, kind: EntityKind) -> &[ConfigEntity] {
        self.entities.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn find(&self, kind: EntityKind, id: &str, cfg: &str) -> Option<&ConfigEntity> {
        self.entities(kind).iter().find(|e| e.id == id && e.cfg == cfg)
    }

    pub fn len(&self) -> usize {
        self.entities.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Immutable view of the store at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationSnapshot {
    /// `0` for the empty snapshot a cache starts with; bumped on every swap.
    pub generation: u64,
    pub loaded_at: DateTime<Utc>,
    pub tenants: BTreeMap<TenantId, TenantConfig>,
}

impl ConfigurationSnapshot {
    fn empty() -> Self {
        Self { generation: 0, loaded_at: Utc::now(), tenants: BTreeMap::new() }
    }

    pub fn tenant(&self, tenant: &TenantId) -> Option<&TenantConfig> {
        self.tenants.get(tenant)
    }

    pub fn get(&self, key: &EntityKey) -> Option<&ConfigEntity> {
        self.tenant(&key.tenant_id)?.find(key.kind, &key.id, &key.cfg)
    }
}

/// Atomically swappable snapshot holder, one per worker process.
#[derive(Debug)]
pub struct ConfigurationCache {
    scope: Vec<TenantId>,
    current: ArcSwap<ConfigurationSnapshot>,
    reload_lock: tokio::sync::Mutex<()>,
}

impl ConfigurationCache {
    /// `scope` lists the tenants to cache; empty means every tenant the store reports.
    pub fn new(scope: Vec<TenantId>) -> Self {
        Self {
            scope,
            current: ArcSwap::from_pointee(ConfigurationSnapshot::empty()),
            reload_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn current(&self) -> Arc<ConfigurationSnapshot> {
        self.current.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.current.load().generation
    }

    /// Re-fetch every tenant in scope and swap the result in.
    ///
    /// Reloads are serialized, so a snapshot built from an older read can never replace
    /// one built from a newer read.
    pub async fn reload(&self, store: &dyn ConfigStore) -> Result<Arc<ConfigurationSnapshot>, StoreError> {
        let _guard = self.reload_lock.lock().await;

        let tenants = if self.scope.is_empty() { store.tenants().await? } else { self.scope.clone() };
        let mut loaded = BTreeMap::new();
        for tenant in tenants {
            let mut config = TenantConfig::default();
            for kind in EntityKind::ALL {
                let entities = store.list(kind, &tenant).await?;
                if !entities.is_empty() {
                    config.entities.insert(kind, entities);
                }
            }
            loaded.insert(tenant, config);
        }

        let next = Arc::new(ConfigurationSnapshot {
            generation: self.generation() + 1,
            loaded_at: Utc::now(),
            tenants: loaded,
        });
        self.current.store(next.clone());
        tracing::debug!(
            target: "fleetline::cache",
            generation = next.generation,
            tenants = next.tenants.len(),
            "configuration snapshot swapped"
        );
        Ok(next)
    }
}
