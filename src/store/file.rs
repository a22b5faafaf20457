//! JSON document store shared by every process on one host.
//!
//! The whole store is one file. Reads parse it fresh each time, so a worker reloading
//! after a notification always sees what the control plane last wrote. Writes go to a
//! sibling temp file which is then renamed over the original; readers never observe a
//! partially written document. Concurrent writers in different processes are last
//! writer wins.

use super::{
    apply, list_of, tenants_of, ConfigEntity, ConfigStore, EntityKey, EntityKind, Mutation,
    MutationOp, StoreError, TenantId,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    entities: Vec<ConfigEntity>,
}

#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    /// A missing file is an empty store; it is created on the first mutation.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: tokio::sync::Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<EntityKey, ConfigEntity>, StoreError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(BTreeMap::new());
        }
        let doc: Document = serde_json::from_slice(&raw)?;
        Ok(doc.entities.into_iter().map(|e| (e.key(), e)).collect())
    }

    async fn save(&self, entities: BTreeMap<EntityKey, ConfigEntity>) -> Result<(), StoreError> {
        let doc = Document { entities: entities.into_values().collect() };
        let bytes = serde_json::to_vec_pretty(&doc)?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "store.json".into());
        let tmp = self.path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn mutate(&self, op: MutationOp) -> Result<Mutation, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut entities = self.load().await?;
        let mutation = apply(&mut entities, op);
        if mutation.changed() {
            self.save(entities).await?;
        }
        Ok(mutation)
    }
}

#[async_trait]
impl ConfigStore for JsonFileStore {
    async fn tenants(&self) -> Result<Vec<TenantId>, StoreError> {
        Ok(tenants_of(&self.load().await?))
    }

    async fn list(&self, kind: EntityKind, tenant: &TenantId) -> Result<Vec<ConfigEntity>, StoreError> {
        Ok(list_of(&self.load().await?, kind, tenant))
    }

    async fn get(&self, key: &EntityKey) -> Result<Option<ConfigEntity>, StoreError> {
        Ok(self.load().await?.remove(key))
    }

    async fn create(&self, entity: ConfigEntity) -> Result<Mutation, StoreError> {
        self.mutate(MutationOp::Create(entity)).await
    }

    async fn update(&self, entity: ConfigEntity) -> Result<Mutation, StoreError> {
        self.mutate(MutationOp::Update(entity)).await
    }

    async fn remove(&self, key: &EntityKey) -> Result<Mutation, StoreError> {
        self.mutate(MutationOp::Remove(key.clone())).await
    }
}
