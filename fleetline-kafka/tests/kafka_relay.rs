use fleetline::config::ExecutionMode;
use fleetline::relay::{RelayContext, RelayError, RelayPlugin};
use fleetline_kafka::{KafkaRelayConfig, KafkaRelayPlugin};
use rdkafka::{
    admin::{AdminClient, AdminOptions, NewTopic, TopicReplication},
    client::DefaultClientContext,
    consumer::{Consumer, StreamConsumer},
    ClientConfig, Message,
};
use std::time::Duration;
use uuid::Uuid;

fn config(brokers: &str, stream: &str, max_in_flight: i64) -> KafkaRelayConfig {
    KafkaRelayConfig {
        brokers: brokers.to_string(),
        stream: stream.to_string(),
        client_id: "fleetline-test".into(),
        max_in_flight,
        tls_ca: None,
    }
}

#[test]
fn zero_in_flight_fails_construction() {
    let err = KafkaRelayPlugin::new(config("127.0.0.1:9092", "relay.out", 0), ExecutionMode::Development).unwrap_err();
    assert_eq!(err, RelayError::InvalidTuning { param: "maxInFlightRequests", value: 0 });
    assert!(err.is_construction());
}

// Requires Kafka running. If FLEETLINE_TEST_KAFKA_BROKERS is unset, the test skips.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn relays_text_to_the_stream() {
    let brokers = match std::env::var("FLEETLINE_TEST_KAFKA_BROKERS") {
        Ok(v) => v,
        Err(_) => {
            eprintln!("skipping: set FLEETLINE_TEST_KAFKA_BROKERS (e.g. 127.0.0.1:9092)");
            return;
        }
    };

    let unique_id = Uuid::new_v4().to_string();
    let topic_name = format!("fleetline.relay.test.{unique_id}");

    let admin_client: AdminClient<DefaultClientContext> = ClientConfig::new()
        .set("bootstrap.servers", &brokers)
        .create()
        .expect("failed to create Kafka AdminClient");
    admin_client
        .create_topics(&[NewTopic::new(&topic_name, 1, TopicReplication::Fixed(1))], &AdminOptions::new())
        .await
        .expect("failed to create topic");

    let mut relay = KafkaRelayPlugin::new(config(&brokers, &topic_name, 1), ExecutionMode::Development).unwrap();
    relay.init(RelayContext::default()).await.expect("init");
    relay.relay(b"{\"txId\":\"abc\"}".to_vec().into()).await.expect("relay");

    let consumer: StreamConsumer = ClientConfig::new()
        .set("group.id", format!("fleetline-test-{unique_id}"))
        .set("bootstrap.servers", &brokers)
        .set("auto.offset.reset", "earliest")
        .set("enable.auto.commit", "false")
        .create()
        .expect("failed to create Kafka consumer");
    consumer.subscribe(&[&topic_name]).expect("subscribe");

    let msg = tokio::time::timeout(Duration::from_secs(10), consumer.recv())
        .await
        .expect("timeout waiting for message")
        .expect("failed to receive message");
    let val: serde_json::Value = serde_json::from_slice(msg.payload().expect("payload")).unwrap();
    assert_eq!(val["txId"], "abc");

    consumer.unsubscribe();
    admin_client
        .delete_topics(&[&topic_name], &AdminOptions::new())
        .await
        .expect("failed to delete topic");
}

#[tokio::test]
async fn unreachable_broker_fails_init() {
    if std::env::var("FLEETLINE_TEST_KAFKA_BROKERS").is_err() {
        eprintln!("skipping: set FLEETLINE_TEST_KAFKA_BROKERS to run broker tests");
        return;
    }
    let mut relay = KafkaRelayPlugin::new(config("127.0.0.1:1", "relay.out", 1), ExecutionMode::Development).unwrap();
    assert!(matches!(relay.init(RelayContext::default()).await, Err(RelayError::Connect(_))));
}
