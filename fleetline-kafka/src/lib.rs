//! Kafka relay plugin for `fleetline` (companion crate).
//!
//! Payloads are forwarded as text to a single topic through an rdkafka
//! `FutureProducer`. Settings come from the `KAFKA_*` environment variables:
//!
//! | Variable | Meaning |
//! |---|---|
//! | `KAFKA_DESTINATION_TRANSPORT_URL` | broker list |
//! | `KAFKA_PRODUCER_STREAM` | destination topic |
//! | `KAFKA_CLIENT_ID` | client id |
//! | `KAFKA_MAX_IN_FLIGHT_REQUESTS` | in-flight requests per connection, must be > 0 |
//! | `KAFKA_TLS_CA` | optional CA bundle, used outside development mode |

use async_trait::async_trait;
use fleetline::config::ExecutionMode;
use fleetline::relay::{require_positive, RelayContext, RelayError, RelayPayload, RelayPlugin};
use fleetline::telemetry::{self, FleetEvent, RelayEvent};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::ClientConfig;
use std::path::PathBuf;
use std::time::Duration;

const PLUGIN: &str = "kafka";
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings for [`KafkaRelayPlugin`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaRelayConfig {
    pub brokers: String,
    pub stream: String,
    pub client_id: String,
    /// Kept signed so non-positive values can be reported as given.
    pub max_in_flight: i64,
    pub tls_ca: Option<PathBuf>,
}

impl KafkaRelayConfig {
    pub fn from_env() -> Result<Self, RelayError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, RelayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| RelayError::Config(format!("missing required setting {name}")))
        };
        let raw_in_flight = required("KAFKA_MAX_IN_FLIGHT_REQUESTS")?;
        let max_in_flight = raw_in_flight.trim().parse::<i64>().map_err(|e| {
            RelayError::Config(format!("KAFKA_MAX_IN_FLIGHT_REQUESTS={raw_in_flight:?}: {e}"))
        })?;
        Ok(Self {
            brokers: required("KAFKA_DESTINATION_TRANSPORT_URL")?,
            stream: required("KAFKA_PRODUCER_STREAM")?,
            client_id: required("KAFKA_CLIENT_ID")?,
            max_in_flight,
            tls_ca: lookup("KAFKA_TLS_CA").filter(|v| !v.is_empty()).map(PathBuf::from),
        })
    }
}

/// Relays payloads to a Kafka topic.
pub struct KafkaRelayPlugin {
    config: KafkaRelayConfig,
    client_config: ClientConfig,
    max_in_flight: u64,
    producer: Option<FutureProducer>,
    ctx: Option<RelayContext>,
}

impl std::fmt::Debug for KafkaRelayPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaRelayPlugin")
            .field("brokers", &self.config.brokers)
            .field("stream", &self.config.stream)
            .field("max_in_flight", &self.max_in_flight)
            .field("connected", &self.producer.is_some())
            .finish()
    }
}

impl KafkaRelayPlugin {
    /// Validate settings and prepare the producer configuration. Nothing connects
    /// until [`RelayPlugin::init`].
    pub fn new(config: KafkaRelayConfig, mode: ExecutionMode) -> Result<Self, RelayError> {
        let max_in_flight = require_positive("maxInFlightRequests", config.max_in_flight)?;

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", &config.client_id)
            .set("max.in.flight.requests.per.connection", max_in_flight.to_string())
            .set("message.timeout.ms", SEND_TIMEOUT.as_millis().to_string());

        if !mode.is_dev() {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
            match &config.tls_ca {
                Some(ca) if ca.exists() => {
                    client_config.set("ssl.ca.location", ca.to_string_lossy().into_owned());
                }
                Some(ca) => {
                    tracing::warn!(target: "fleetline::relay", ca = %ca.display(), "TLS CA file not found, using system roots");
                }
                None => {}
            }
        }

        Ok(Self { config, client_config, max_in_flight, producer: None, ctx: None })
    }

    pub fn from_env(mode: ExecutionMode) -> Result<Self, RelayError> {
        Self::new(KafkaRelayConfig::from_env()?, mode)
    }

    pub fn config(&self) -> &KafkaRelayConfig {
        &self.config
    }

    pub fn client_config(&self) -> &ClientConfig {
        &self.client_config
    }

    pub fn max_in_flight(&self) -> u64 {
        self.max_in_flight
    }
}

#[async_trait]
impl RelayPlugin for KafkaRelayPlugin {
    fn name(&self) -> &'static str {
        PLUGIN
    }

    async fn init(&mut self, ctx: RelayContext) -> Result<(), RelayError> {
        tracing::info!(
            target: "fleetline::relay",
            parent: ctx.span(),
            brokers = %self.config.brokers,
            "initializing kafka producer"
        );

        let producer: FutureProducer =
            self.client_config.create().map_err(|e| RelayError::Connect(e.to_string()))?;

        // Producers connect lazily; a metadata round trip proves the broker is reachable.
        let probe = producer.clone();
        let topic = self.config.stream.clone();
        tokio::task::spawn_blocking(move || {
            probe.client().fetch_metadata(Some(topic.as_str()), METADATA_TIMEOUT).map(|_| ())
        })
        .await
        .map_err(|e| RelayError::Connect(e.to_string()))?
        .map_err(|e| RelayError::Connect(e.to_string()))?;

        tracing::info!(
            target: "fleetline::relay",
            parent: ctx.span(),
            max_in_flight = self.max_in_flight,
            "kafka producer connected"
        );
        telemetry::emit(ctx.sink(), FleetEvent::Relay(RelayEvent::Initialized { plugin: PLUGIN })).await;
        self.producer = Some(producer);
        self.ctx = Some(ctx);
        Ok(())
    }

    async fn relay(&self, payload: RelayPayload) -> Result<(), RelayError> {
        let (Some(ctx), Some(producer)) = (self.ctx.as_ref(), self.producer.as_ref()) else {
            return Err(RelayError::NotInitialized);
        };
        let bytes = payload.len();
        let text = payload.into_text();
        let topic = self.config.stream.as_str();
        ctx.send(PLUGIN, topic, bytes, async {
            let record = FutureRecord::<(), _>::to(topic).payload(&text);
            producer
                .send(record, SEND_TIMEOUT)
                .await
                .map(|_| ())
                .map_err(|(e, _)| RelayError::Send(e.to_string()))
        })
        .await
    }
}
