//! Kafka adapter (feature `transport-kafka`), using rdkafka's `FutureProducer`.
//!
//! Each channel handle gets its own producer. Options other than the shared
//! keys (`endpoint`, `delivery`, `send_timeout_ms`) are passed straight to the
//! librdkafka client configuration.
use std::time::Duration;

use bytes::Bytes;
use rdkafka::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};

use crate::transport::{
    ConnectOptions, Delivery, OPT_DELIVERY, OPT_ENDPOINT, OPT_SEND_TIMEOUT_MS, Publisher,
    Transport, TransportError,
};

const DEFAULT_BOOTSTRAP: &str = "localhost:9092";
const DEFAULT_SEND_TIMEOUT_MS: u64 = 5000;
const METADATA_TIMEOUT: Duration = Duration::from_secs(5);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct KafkaTransport {
    config: ClientConfig,
    delivery: Delivery,
    send_timeout: Duration,
}

pub async fn connect(opts: ConnectOptions) -> Result<Box<dyn Transport>, TransportError> {
    Ok(Box::new(build(&opts)?))
}

fn build(opts: &ConnectOptions) -> Result<KafkaTransport, TransportError> {
    let bootstrap = opts.endpoint().unwrap_or(DEFAULT_BOOTSTRAP).to_string();
    let delivery = opts.delivery()?;
    let send_timeout_ms = opts.send_timeout_ms(DEFAULT_SEND_TIMEOUT_MS)?;

    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", &bootstrap)
        .set("message.timeout.ms", send_timeout_ms.to_string());
    if delivery == Delivery::Acknowledged {
        config.set("acks", "all");
    }
    for (k, v) in &opts.params {
        if k == OPT_ENDPOINT || k == OPT_DELIVERY || k == OPT_SEND_TIMEOUT_MS {
            continue;
        }
        config.set(k, v);
    }

    tracing::debug!(%bootstrap, delivery = delivery.as_str(), "kafka transport configured");
    Ok(KafkaTransport {
        config,
        delivery,
        send_timeout: Duration::from_millis(send_timeout_ms),
    })
}

impl KafkaTransport {
    fn producer(&self) -> Result<FutureProducer, TransportError> {
        let mut config = self.config.clone();
        config.set("client.id", format!("synth-pub-{}", uuid::Uuid::new_v4()));
        config
            .create()
            .map_err(|e| TransportError::Connect(e.to_string()))
    }
}

#[async_trait::async_trait]
impl Transport for KafkaTransport {
    async fn create_publisher(&self, topic: &str) -> Result<Box<dyn Publisher>, TransportError> {
        let producer = self.producer()?;
        Ok(Box::new(KafkaPublisher {
            producer,
            topic: topic.to_string(),
            delivery: self.delivery,
            send_timeout: self.send_timeout,
        }))
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), TransportError> {
        // Metadata fetch blocks in librdkafka; keep it off the runtime threads.
        let producer = self.producer()?;
        tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(None, METADATA_TIMEOUT)
                .map(|md| md.brokers().len())
        })
        .await
        .map_err(|e| TransportError::Other(e.to_string()))?
        .map_err(|e| TransportError::Connect(e.to_string()))
        .and_then(|brokers| {
            if brokers == 0 {
                Err(TransportError::Connect("no brokers in cluster metadata".into()))
            } else {
                tracing::debug!(brokers, "kafka health check passed");
                Ok(())
            }
        })
    }
}

struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
    delivery: Delivery,
    send_timeout: Duration,
}

#[async_trait::async_trait]
impl Publisher for KafkaPublisher {
    async fn publish(&self, payload: Bytes) -> Result<(), TransportError> {
        let record = FutureRecord::<(), [u8]>::to(&self.topic).payload(payload.as_ref());
        match self.delivery {
            Delivery::Acknowledged => {
                self.producer
                    .send(record, self.send_timeout)
                    .await
                    .map_err(|(err, _)| TransportError::Publish(err.to_string()))?;
            }
            Delivery::FireAndForget => {
                // The delivery future is dropped; the payload stays queued.
                let _ = self
                    .producer
                    .send_result(record)
                    .map_err(|(err, _)| TransportError::Publish(err.to_string()))?;
            }
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(FLUSH_TIMEOUT))
            .await
            .map_err(|e| TransportError::Other(e.to_string()))?
            .map_err(|e| TransportError::Publish(format!("flush: {e}")))
    }
}
