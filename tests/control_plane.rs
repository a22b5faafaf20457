mod common;

use common::test_helpers::{rule_active, start_worker, TENANT};
use fleetline::control::transport::{handle_frame, TransportReply};
use fleetline::control::{CommandFailure, CommandResult, ControlPlane, MemoryAuditSink};
use fleetline::reload::{InMemoryBus, ReloadPublisher};
use fleetline::store::{ConfigStore, EntityKind, JsonFileStore, TenantId};
use serde_json::json;
use std::sync::Arc;

fn frame(id: &str, cmd: &str, args: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&json!({ "id": id, "tenant": TENANT, "cmd": cmd, "args": args, "principal": "ops" })).unwrap()
}

async fn send(plane: &ControlPlane, raw: Vec<u8>) -> TransportReply {
    serde_json::from_slice(&handle_frame(plane, &raw).await).unwrap()
}

#[tokio::test]
async fn file_backed_admin_and_worker_share_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    let bus = InMemoryBus::new();

    // Separate handles on one file, as an admin process and a rule process would hold.
    let admin_store: Arc<dyn ConfigStore> = Arc::new(JsonFileStore::new(&path));
    let worker_store: Arc<dyn ConfigStore> = Arc::new(JsonFileStore::new(&path));
    let audit = Arc::new(MemoryAuditSink::new());
    let plane = ControlPlane::new(admin_store, ReloadPublisher::new(Arc::new(bus.clone()), "config:reload"))
        .with_audit(audit.clone());

    let created = send(
        &plane,
        frame("c-1", "create", json!({ "kind": "rule_config", "id": "901", "cfg": "1.0.0", "body": { "ruleActive": true } })),
    )
    .await;
    assert_eq!(created.result, Some(CommandResult::Mutated { rows_affected: 1, published: true }));

    let mut worker = start_worker(worker_store, Some(&bus)).await;
    assert_eq!(rule_active(&worker), Some(true));

    let updated = send(
        &plane,
        frame("u-1", "update", json!({ "kind": "rule_config", "id": "901", "cfg": "1.0.0", "body": { "ruleActive": false } })),
    )
    .await;
    assert_eq!(updated.id, "u-1");
    worker.subscriber_mut().unwrap().wait_handled(1).await;
    assert_eq!(rule_active(&worker), Some(false));

    let records = audit.records().await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].label, "update_rule_config");
    assert_eq!(records[1].principal, "ops");
    assert_eq!(records[1].tenant, TenantId::from(TENANT));
}

#[tokio::test]
async fn network_map_create_replaces_existing_entry() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileStore::new(dir.path().join("config.json")));
    let plane = ControlPlane::new(store.clone(), ReloadPublisher::new(Arc::new(InMemoryBus::new()), "config:reload"));

    for active in [true, false] {
        let reply = send(
            &plane,
            frame("nm", "create", json!({ "kind": "network_map", "id": "default", "cfg": "1.0.0", "body": { "active": active } })),
        )
        .await;
        assert!(matches!(reply.result, Some(CommandResult::Mutated { rows_affected: 1, .. })));
    }

    let maps = store.list(EntityKind::NetworkMap, &TenantId::from(TENANT)).await.unwrap();
    assert_eq!(maps.len(), 1);
    assert_eq!(maps[0].body["active"], false);
}

#[tokio::test]
async fn list_pages_and_lookups_report_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileStore::new(dir.path().join("config.json")));
    let plane = ControlPlane::new(store, ReloadPublisher::new(Arc::new(InMemoryBus::new()), "config:reload"));

    for (id, cfg) in [("001", "1.0.0"), ("002", "1.0.0"), ("003", "2.0.0")] {
        send(&plane, frame(id, "create", json!({ "kind": "typology_config", "id": id, "cfg": cfg, "body": { "cfg": cfg } }))).await;
    }

    let page = send(&plane, frame("l", "list", json!({ "kind": "typology_config", "offset": 1, "limit": 1 }))).await;
    match page.result {
        Some(CommandResult::List { data, total }) => {
            assert_eq!(total, 3);
            assert_eq!(data.len(), 1);
            assert_eq!(data[0].id, "002");
        }
        other => panic!("unexpected {other:?}"),
    }

    let filtered = send(&plane, frame("f", "list", json!({ "kind": "typology_config", "filter": ["cfg", "2.0.0"] }))).await;
    assert!(matches!(filtered.result, Some(CommandResult::List { total: 1, .. })));

    let missing = send(&plane, frame("g", "get", json!({ "kind": "typology_config", "id": "404", "cfg": "1.0.0" }))).await;
    assert!(matches!(missing.result, Some(CommandResult::Error(CommandFailure::NotFound { .. }))));

    let garbage = handle_frame(&plane, b"{not json").await;
    let garbage: TransportReply = serde_json::from_slice(&garbage).unwrap();
    assert!(garbage.error.is_some());
}
