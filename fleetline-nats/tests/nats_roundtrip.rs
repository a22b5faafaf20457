use fleetline::bootstrap::{ConnectRequest, TransportConnector};
use fleetline::cache::ConfigurationCache;
use fleetline::control::ControlPlane;
use fleetline::reload::{ReloadChannel, ReloadPublisher, ReloadSubscriber};
use fleetline::store::{ConfigEntity, ConfigStore, EntityKind, InMemoryConfigStore};
use fleetline_nats::{ControlListener, LoggingHandler, NatsReloadBus, NatsTransport};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// Requires NATS running. If FLEETLINE_TEST_NATS_URL is unset, the tests skip.
fn nats_url() -> Option<String> {
    match std::env::var("FLEETLINE_TEST_NATS_URL") {
        Ok(v) => Some(v),
        Err(_) => {
            eprintln!("skipping: set FLEETLINE_TEST_NATS_URL (e.g. nats://127.0.0.1:4222)");
            None
        }
    }
}

#[tokio::test]
async fn transport_refuses_unreachable_server() {
    let transport = NatsTransport::new("nats://127.0.0.1:1", Arc::new(LoggingHandler));
    assert!(transport.connect(&ConnectRequest::default()).await.is_err());
}

#[tokio::test]
async fn reload_reaches_a_subscribed_cache() {
    let Some(url) = nats_url() else { return };
    let channel = format!("config:reload:{}", Uuid::new_v4());

    let store = Arc::new(InMemoryConfigStore::new());
    let bus: Arc<dyn ReloadChannel> = Arc::new(NatsReloadBus::new(url.clone()));
    let cache = Arc::new(ConfigurationCache::new(Vec::new()));
    let mut handle = ReloadSubscriber::new(bus.clone(), channel.clone(), cache.clone(), store.clone())
        .start()
        .await;
    assert!(!handle.is_stale());

    store
        .create(ConfigEntity::new(EntityKind::RuleConfig, "t1", "901", "1.0.0", serde_json::json!({ "ruleActive": false })))
        .await
        .unwrap();
    ReloadPublisher::new(bus, channel).publish(fleetline::reload::ReloadNotification::ping_now()).await;

    let handled = tokio::time::timeout(Duration::from_secs(5), handle.wait_handled(1)).await.unwrap();
    assert_eq!(handled, Some(1));
    assert_eq!(cache.current().tenants.len(), 1);
    handle.shutdown();
}

#[tokio::test]
async fn control_listener_answers_requests() {
    let Some(url) = nats_url() else { return };
    let subject = format!("fleetline.control.{}", Uuid::new_v4());
    let store = Arc::new(InMemoryConfigStore::new());
    let publisher = ReloadPublisher::new(Arc::new(NatsReloadBus::new(url.clone())), "config:reload");
    let plane = Arc::new(ControlPlane::new(store.clone(), publisher));

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let listener = ControlListener::new(url.clone(), subject.clone(), plane);
    let serving = tokio::spawn(listener.serve(async move {
        let _ = stop_rx.await;
    }));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let client = nats::asynk::connect(url.as_str()).await.unwrap();
    let frame = serde_json::json!({
        "id": "req-1",
        "tenant": "t1",
        "cmd": "create",
        "args": { "kind": "typology_config", "id": "999", "cfg": "1.0.0", "body": {} }
    });
    let reply = client.request(&subject, serde_json::to_vec(&frame).unwrap()).await.unwrap();
    let reply: serde_json::Value = serde_json::from_slice(&reply.data).unwrap();
    assert_eq!(reply["id"], "req-1");
    assert_eq!(reply["result"]["mutated"]["rows_affected"], 1);
    assert_eq!(store.list(EntityKind::TypologyConfig, &"t1".into()).await.unwrap().len(), 1);

    let _ = stop_tx.send(());
    serving.await.unwrap().unwrap();
}
