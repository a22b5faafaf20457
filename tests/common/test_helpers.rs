use fleetline::config::ServiceConfiguration;
use fleetline::reload::InMemoryBus;
use fleetline::store::{ConfigEntity, ConfigStore, EntityKind, InMemoryConfigStore, TenantId};
use fleetline::topology::{SpawnedWorker, WorkerExit, WorkerSpawner};
use fleetline::worker::{NoTransport, RunningWorker, WorkerRuntime};
use futures::FutureExt;
use serde_json::json;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

pub const TENANT: &str = "tenant-a";

pub fn rule(active: bool) -> ConfigEntity {
    ConfigEntity::new(EntityKind::RuleConfig, TENANT, "901", "1.0.0", json!({ "ruleActive": active }))
}

pub async fn seeded_store() -> InMemoryConfigStore {
    let store = InMemoryConfigStore::new();
    store.create(rule(true)).await.unwrap();
    store
}

pub async fn start_worker(store: Arc<dyn ConfigStore>, bus: Option<&InMemoryBus>) -> RunningWorker<()> {
    let mut runtime = WorkerRuntime::new(ServiceConfiguration::offline("rule-901"), store);
    if let Some(bus) = bus {
        runtime = runtime.with_bus(Arc::new(bus.clone()));
    }
    runtime.start(&NoTransport).await.unwrap()
}

/// `ruleActive` of the seeded rule as this worker currently sees it.
pub fn rule_active<C>(worker: &RunningWorker<C>) -> Option<bool> {
    let snapshot = worker.snapshot();
    snapshot
        .tenant(&TenantId::from(TENANT))?
        .find(EntityKind::RuleConfig, "901", "1.0.0")?
        .body["ruleActive"]
        .as_bool()
}

/// Spawner whose children exit when the test says so.
#[derive(Default)]
pub struct FakeSpawner {
    next_pid: AtomicU32,
    children: Mutex<HashMap<u32, oneshot::Sender<WorkerExit>>>,
    spawned: Mutex<Vec<(usize, u32)>>,
    fail_slots: Mutex<Vec<usize>>,
}

impl FakeSpawner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { next_pid: AtomicU32::new(1000), ..Default::default() })
    }

    pub fn fail_slot(&self, slot: usize) {
        self.fail_slots.lock().unwrap().push(slot);
    }

    /// (slot, pid) of every spawn, in order.
    pub fn spawned(&self) -> Vec<(usize, u32)> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn live_pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.children.lock().unwrap().keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    /// Make the child with `pid` exit with `code`.
    pub fn exit(&self, pid: u32, code: i32) {
        if let Some(tx) = self.children.lock().unwrap().remove(&pid) {
            let _ = tx.send(WorkerExit { code: Some(code) });
        }
    }
}

impl WorkerSpawner for FakeSpawner {
    fn spawn(&self, slot: usize) -> io::Result<SpawnedWorker> {
        if self.fail_slots.lock().unwrap().contains(&slot) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "fork refused"));
        }
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.children.lock().unwrap().insert(pid, tx);
        self.spawned.lock().unwrap().push((slot, pid));
        let exit = rx.map(|res| res.unwrap_or(WorkerExit { code: None })).boxed();
        Ok(SpawnedWorker { pid, exit })
    }
}
