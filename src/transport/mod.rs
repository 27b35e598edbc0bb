//! Transport abstraction: trait, types, and builder factory.

pub mod config;
#[cfg(feature = "transport-kafka")]
pub mod kafka;
#[cfg(any(test, feature = "transport-mock"))]
pub mod mock;
#[cfg(feature = "transport-mqtt")]
pub mod mqtt;

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Engine {
    Kafka,
    Mqtt,
    #[cfg(any(test, feature = "transport-mock"))]
    Mock,
}

impl Engine {
    /// Broker address used when none is configured.
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            Engine::Kafka => "localhost:9092",
            Engine::Mqtt => "localhost:1883",
            #[cfg(any(test, feature = "transport-mock"))]
            Engine::Mock => "mock:0",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Engine::Kafka => "kafka",
            Engine::Mqtt => "mqtt",
            #[cfg(any(test, feature = "transport-mock"))]
            Engine::Mock => "mock",
        };
        f.write_str(name)
    }
}

/// How long a send waits before reporting success.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Delivery {
    /// Return once the payload is queued in the client.
    FireAndForget,
    /// Return once the broker acknowledged the payload.
    #[default]
    Acknowledged,
}

impl Delivery {
    pub fn as_str(&self) -> &'static str {
        match self {
            Delivery::FireAndForget => "fire-and-forget",
            Delivery::Acknowledged => "acknowledged",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fire-and-forget" => Some(Delivery::FireAndForget),
            "acknowledged" => Some(Delivery::Acknowledged),
            _ => None,
        }
    }
}

/// Well-known connect option keys shared by all engines.
pub const OPT_ENDPOINT: &str = "endpoint";
pub const OPT_DELIVERY: &str = "delivery";
pub const OPT_SEND_TIMEOUT_MS: &str = "send_timeout_ms";

#[derive(Clone, Debug, Default)]
pub struct ConnectOptions {
    pub params: BTreeMap<String, String>,
}

impl ConnectOptions {
    pub fn endpoint(&self) -> Option<&str> {
        self.params.get(OPT_ENDPOINT).map(String::as_str)
    }

    pub fn delivery(&self) -> Result<Delivery, TransportError> {
        match self.params.get(OPT_DELIVERY) {
            None => Ok(Delivery::default()),
            Some(s) => Delivery::parse(s)
                .ok_or_else(|| TransportError::Config(format!("unknown delivery mode '{s}'"))),
        }
    }

    pub fn send_timeout_ms(&self, default: u64) -> Result<u64, TransportError> {
        match self.params.get(OPT_SEND_TIMEOUT_MS) {
            None => Ok(default),
            Some(s) => s
                .parse()
                .map_err(|_| TransportError::Config(format!("invalid send_timeout_ms '{s}'"))),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("connect: {0}")]
    Connect(String),
    #[error("publish: {0}")]
    Publish(String),
    #[error("config: {0}")]
    Config(String),
    #[error("timeout")]
    Timeout,
    #[error("disconnected")]
    Disconnected,
    #[error("other: {0}")]
    Other(String),
}

impl TransportError {
    /// Whether a retry could plausibly succeed. Only used for diagnostics;
    /// the publish loop treats every send failure as fatal.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Disconnected)
    }
}

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Open a channel handle bound to one topic.
    async fn create_publisher(&self, topic: &str) -> Result<Box<dyn Publisher>, TransportError>;
    async fn shutdown(&self) -> Result<(), TransportError>;
    /// Verify the broker is reachable.
    async fn health_check(&self) -> Result<(), TransportError>;
}

#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, payload: Bytes) -> Result<(), TransportError>;
    /// Release the handle, flushing anything still queued.
    async fn shutdown(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

pub struct TransportBuilder;

impl TransportBuilder {
    pub async fn connect(
        engine: Engine,
        opts: ConnectOptions,
    ) -> Result<Box<dyn Transport>, TransportError> {
        match engine {
            Engine::Kafka => {
                #[cfg(feature = "transport-kafka")]
                {
                    crate::transport::kafka::connect(opts).await
                }
                #[cfg(not(feature = "transport-kafka"))]
                {
                    let _ = opts;
                    Err(TransportError::Connect("kafka feature disabled".into()))
                }
            }
            Engine::Mqtt => {
                #[cfg(feature = "transport-mqtt")]
                {
                    crate::transport::mqtt::connect(opts).await
                }
                #[cfg(not(feature = "transport-mqtt"))]
                {
                    let _ = opts;
                    Err(TransportError::Connect("mqtt feature disabled".into()))
                }
            }
            #[cfg(any(test, feature = "transport-mock"))]
            Engine::Mock => crate::transport::mock::connect(opts).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_defaults_to_acknowledged() {
        let opts = ConnectOptions::default();
        assert_eq!(opts.delivery().unwrap(), Delivery::Acknowledged);
        assert_eq!(opts.send_timeout_ms(5000).unwrap(), 5000);
    }

    #[test]
    fn delivery_option_parsing() {
        let mut opts = ConnectOptions::default();
        opts.params.insert(OPT_DELIVERY.into(), "fire-and-forget".into());
        assert_eq!(opts.delivery().unwrap(), Delivery::FireAndForget);
        opts.params.insert(OPT_DELIVERY.into(), "eventually".into());
        assert!(matches!(opts.delivery(), Err(TransportError::Config(_))));
    }

    #[test]
    fn default_endpoint_per_engine() {
        assert_eq!(Engine::Kafka.default_endpoint(), "localhost:9092");
        assert_eq!(Engine::Mqtt.default_endpoint(), "localhost:1883");
    }

    #[test]
    fn recoverable_classification() {
        assert!(TransportError::Timeout.is_recoverable());
        assert!(!TransportError::Publish("x".into()).is_recoverable());
    }
}
