//! Publisher settings: built-in defaults, an optional YAML file, then CLI
//! overrides, in increasing precedence.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transport::config::{parse_connect_kv, parse_engine};
use crate::transport::{
    ConnectOptions, Delivery, Engine, OPT_DELIVERY, OPT_ENDPOINT, OPT_SEND_TIMEOUT_MS,
};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing settings: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("unknown engine '{0}'")]
    UnknownEngine(String),
    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub engine: String,
    /// `host:port`; defaults to the engine's usual port on localhost
    pub broker: Option<String>,
    pub unstructured_topic: String,
    pub structured_topic: String,
    pub interval_ms: u64,
    pub delivery: Delivery,
    pub send_timeout_ms: u64,
    pub seed: Option<u64>,
    pub max_cycles: Option<u64>,
    /// Extra engine options, passed through verbatim
    pub connect: BTreeMap<String, String>,
    pub csv: Option<PathBuf>,
    pub snapshot_interval_secs: u64,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            engine: "kafka".into(),
            broker: None,
            unstructured_topic: "random_data".into(),
            structured_topic: "structured_data".into(),
            interval_ms: 1000,
            delivery: Delivery::Acknowledged,
            send_timeout_ms: 5000,
            seed: None,
            max_cycles: None,
            connect: BTreeMap::new(),
            csv: None,
            snapshot_interval_secs: 10,
            log_level: "info".into(),
        }
    }
}

/// Command-line overrides; every field is optional.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct Overrides {
    /// Broker engine (kafka, mqtt, mock)
    #[arg(long)]
    pub engine: Option<String>,

    /// Broker address (host:port)
    #[arg(long)]
    pub broker: Option<String>,

    /// Topic receiving the plain integer samples
    #[arg(long)]
    pub unstructured_topic: Option<String>,

    /// Topic receiving the JSON record samples
    #[arg(long)]
    pub structured_topic: Option<String>,

    /// Delay between cycles in milliseconds
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Delivery mode
    #[arg(long, value_enum)]
    pub delivery: Option<Delivery>,

    /// Per-send acknowledgement timeout in milliseconds
    #[arg(long)]
    pub send_timeout_ms: Option<u64>,

    /// Seed for reproducible samples
    #[arg(long)]
    pub seed: Option<u64>,

    /// Stop after this many cycles instead of running until Ctrl+C
    #[arg(long = "cycles")]
    pub max_cycles: Option<u64>,

    /// Extra engine options as key=value (repeatable)
    #[arg(long = "connect", value_name = "KEY=VALUE")]
    pub connect: Vec<String>,

    /// Write statistics snapshots to this CSV file
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Seconds between statistics snapshots
    #[arg(long = "snapshot-interval")]
    pub snapshot_interval_secs: Option<u64>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Settings {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Load from `path`, or defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            None => Ok(Self::default()),
            Some(p) => {
                let text = std::fs::read_to_string(p).map_err(|source| ConfigError::Read {
                    path: p.to_path_buf(),
                    source,
                })?;
                Self::from_yaml_str(&text)
            }
        }
    }

    pub fn apply(&mut self, o: Overrides) {
        if let Some(v) = o.engine {
            self.engine = v;
        }
        if o.broker.is_some() {
            self.broker = o.broker;
        }
        if let Some(v) = o.unstructured_topic {
            self.unstructured_topic = v;
        }
        if let Some(v) = o.structured_topic {
            self.structured_topic = v;
        }
        if let Some(v) = o.interval_ms {
            self.interval_ms = v;
        }
        if let Some(v) = o.delivery {
            self.delivery = v;
        }
        if let Some(v) = o.send_timeout_ms {
            self.send_timeout_ms = v;
        }
        if o.seed.is_some() {
            self.seed = o.seed;
        }
        if o.max_cycles.is_some() {
            self.max_cycles = o.max_cycles;
        }
        self.connect.extend(parse_connect_kv(&o.connect).params);
        if o.csv.is_some() {
            self.csv = o.csv;
        }
        if let Some(v) = o.snapshot_interval_secs {
            self.snapshot_interval_secs = v;
        }
        if let Some(v) = o.log_level {
            self.log_level = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine()?;
        if self.broker().trim().is_empty() {
            return Err(invalid("broker", "must not be empty"));
        }
        if self.unstructured_topic.trim().is_empty() {
            return Err(invalid("unstructured_topic", "must not be empty"));
        }
        if self.structured_topic.trim().is_empty() {
            return Err(invalid("structured_topic", "must not be empty"));
        }
        if self.interval_ms == 0 {
            return Err(invalid("interval_ms", "must be greater than zero"));
        }
        if self.send_timeout_ms == 0 {
            return Err(invalid("send_timeout_ms", "must be greater than zero"));
        }
        if self.snapshot_interval_secs == 0 {
            return Err(invalid("snapshot_interval_secs", "must be greater than zero"));
        }
        Ok(())
    }

    pub fn engine(&self) -> Result<Engine, ConfigError> {
        parse_engine(&self.engine).ok_or_else(|| ConfigError::UnknownEngine(self.engine.clone()))
    }

    /// Configured broker address, or the default for the selected engine.
    pub fn broker(&self) -> &str {
        match &self.broker {
            Some(b) => b.as_str(),
            None => self
                .engine()
                .map_or(Engine::Kafka.default_endpoint(), |e| e.default_endpoint()),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Options handed to the transport builder. Passthrough entries never
    /// replace the shared keys.
    pub fn connect_options(&self) -> ConnectOptions {
        let mut opts = ConnectOptions {
            params: self.connect.clone(),
        };
        opts.params.insert(OPT_ENDPOINT.into(), self.broker().to_string());
        opts.params
            .insert(OPT_DELIVERY.into(), self.delivery.as_str().into());
        opts.params
            .insert(OPT_SEND_TIMEOUT_MS.into(), self.send_timeout_ms.to_string());
        opts
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_classic_setup() {
        let s = Settings::default();
        assert_eq!(s.broker(), "localhost:9092");
        assert_eq!(s.unstructured_topic, "random_data");
        assert_eq!(s.structured_topic, "structured_data");
        assert_eq!(s.interval(), Duration::from_secs(1));
        assert_eq!(s.delivery, Delivery::Acknowledged);
        assert_eq!(s.engine().unwrap(), Engine::Kafka);
        s.validate().unwrap();
    }

    #[test]
    fn yaml_fills_missing_fields_with_defaults() {
        let s = Settings::from_yaml_str(
            "broker: kafka-1:9092\ndelivery: fire-and-forget\nconnect:\n  linger.ms: \"5\"\n",
        )
        .unwrap();
        assert_eq!(s.broker(), "kafka-1:9092");
        assert_eq!(s.delivery, Delivery::FireAndForget);
        assert_eq!(s.connect["linger.ms"], "5");
        assert_eq!(s.structured_topic, "structured_data");
    }

    #[test]
    fn yaml_rejects_unknown_keys() {
        assert!(matches!(
            Settings::from_yaml_str("brokers: x\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn overrides_take_precedence() {
        let mut s = Settings::from_yaml_str("broker: a:1\nseed: 3\n").unwrap();
        s.apply(Overrides {
            broker: Some("b:2".into()),
            max_cycles: Some(5),
            connect: vec!["acks=1".into()],
            ..Default::default()
        });
        assert_eq!(s.broker(), "b:2");
        assert_eq!(s.seed, Some(3));
        assert_eq!(s.max_cycles, Some(5));
        assert_eq!(s.connect["acks"], "1");
    }

    #[test]
    fn broker_default_follows_engine() {
        let mut s = Settings::from_yaml_str("engine: mqtt\n").unwrap();
        assert_eq!(s.broker(), "localhost:1883");
        assert_eq!(s.connect_options().endpoint(), Some("localhost:1883"));

        s.apply(Overrides {
            engine: Some("kafka".into()),
            ..Default::default()
        });
        assert_eq!(s.broker(), "localhost:9092");

        s.apply(Overrides {
            engine: Some("mqtt".into()),
            broker: Some("mosquitto:1883".into()),
            ..Default::default()
        });
        assert_eq!(s.broker(), "mosquitto:1883");
    }

    #[test]
    fn validation_failures() {
        let mut s = Settings {
            interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            s.validate(),
            Err(ConfigError::Invalid { field: "interval_ms", .. })
        ));
        s.interval_ms = 1000;
        s.structured_topic = " ".into();
        assert!(matches!(
            s.validate(),
            Err(ConfigError::Invalid { field: "structured_topic", .. })
        ));
        s.structured_topic = "t".into();
        s.broker = Some("".into());
        assert!(matches!(
            s.validate(),
            Err(ConfigError::Invalid { field: "broker", .. })
        ));
        s.broker = None;
        s.engine = "carrier-pigeon".into();
        assert!(matches!(s.validate(), Err(ConfigError::UnknownEngine(_))));
    }

    #[test]
    fn connect_options_carry_shared_keys() {
        let mut s = Settings::default();
        s.connect.insert(OPT_ENDPOINT.into(), "ignored:1".into());
        s.connect.insert("security.protocol".into(), "SSL".into());
        let opts = s.connect_options();
        assert_eq!(opts.endpoint(), Some("localhost:9092"));
        assert_eq!(opts.delivery().unwrap(), Delivery::Acknowledged);
        assert_eq!(opts.params["security.protocol"], "SSL");
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = Settings::load(Some(Path::new("/nonexistent/synth-pub.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
