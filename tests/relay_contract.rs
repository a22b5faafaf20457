use fleetline::relay::{LogRelay, MemoryRelay, RelayContext, RelayError, RelayPayload, RelayPlugin};
use fleetline::telemetry::{shared, FleetEvent, MemorySink, RelayEvent};
use fleetline::{ErrorClass, FleetError};

#[test]
fn non_positive_tuning_rejects_construction() {
    for value in [0, -1, i64::MIN] {
        let err = MemoryRelay::new(value).unwrap_err();
        assert_eq!(err, RelayError::InvalidTuning { param: "max_in_flight_requests", value });
        assert_eq!(FleetError::from(err).class(), ErrorClass::FatalStartup);
    }
}

#[tokio::test]
async fn relays_report_through_the_injected_context() {
    let memory = MemorySink::new();
    let ctx = RelayContext::new(tracing::info_span!("worker", slot = 0)).with_sink(shared(memory.clone()));

    let mut relays: Vec<Box<dyn RelayPlugin>> = vec![Box::new(LogRelay::new()), Box::new(MemoryRelay::new(1).unwrap())];
    for relay in relays.iter_mut() {
        relay.init(ctx.clone()).await.unwrap();
        relay.relay(RelayPayload::from(b"tx".to_vec())).await.unwrap();
    }

    assert_eq!(memory.count(|e| matches!(e, FleetEvent::Relay(RelayEvent::Initialized { .. }))), 2);
    assert_eq!(
        memory.count(|e| matches!(e, FleetEvent::Relay(RelayEvent::Sent { bytes: 2, .. }))),
        2
    );
}

#[tokio::test]
async fn send_failure_is_per_call() {
    let mut relay = MemoryRelay::new(3).unwrap();
    relay.init(RelayContext::default()).await.unwrap();
    relay.set_failing(true);
    let err = relay.relay("payload".into()).await.unwrap_err();
    assert_eq!(FleetError::from(err).class(), ErrorClass::PerCall);

    relay.set_failing(false);
    relay.relay("payload".into()).await.unwrap();
    assert_eq!(relay.sent(), vec!["payload".to_string()]);
}
