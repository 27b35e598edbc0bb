use super::{ConnectOptions, Engine};

pub fn parse_engine(s: &str) -> Option<Engine> {
    match s.to_lowercase().as_str() {
        "kafka" => Some(Engine::Kafka),
        "mqtt" => Some(Engine::Mqtt),
        #[cfg(any(test, feature = "transport-mock"))]
        "mock" => Some(Engine::Mock),
        _ => None,
    }
}

/// Collect `key=value` pairs into connect options; malformed pairs are skipped.
pub fn parse_connect_kv(pairs: &[String]) -> ConnectOptions {
    let mut opts = ConnectOptions::default();
    for p in pairs {
        if let Some((k, v)) = p.split_once('=') {
            opts.params.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    opts
}

/// Split `host:port`, falling back to `default_port` when no port is given.
pub fn split_host_port(endpoint: &str, default_port: u16) -> Option<(String, u16)> {
    match endpoint.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            port.parse().ok().map(|p| (host.to_string(), p))
        }
        Some(_) => None,
        None if !endpoint.is_empty() => Some((endpoint.to_string(), default_port)),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engines_are_case_insensitive() {
        assert_eq!(parse_engine("Kafka"), Some(Engine::Kafka));
        assert_eq!(parse_engine("mqtt"), Some(Engine::Mqtt));
        assert_eq!(parse_engine("mock"), Some(Engine::Mock));
        assert_eq!(parse_engine("zenoh"), None);
    }

    #[test]
    fn kv_pairs() {
        let opts = parse_connect_kv(&[
            "security.protocol=SASL_SSL".to_string(),
            "garbage".to_string(),
            "a = b=c".to_string(),
        ]);
        assert_eq!(opts.params.len(), 2);
        assert_eq!(opts.params["security.protocol"], "SASL_SSL");
        assert_eq!(opts.params["a"], "b=c");
    }

    #[test]
    fn host_port() {
        assert_eq!(
            split_host_port("localhost:9092", 1883),
            Some(("localhost".to_string(), 9092))
        );
        assert_eq!(
            split_host_port("broker", 1883),
            Some(("broker".to_string(), 1883))
        );
        assert_eq!(split_host_port("broker:abc", 1883), None);
        assert_eq!(split_host_port(":1883", 1883), None);
    }
}
