//! MQTT adapter (feature `transport-mqtt`), using rumqttc (async).
//!
//! Delivery mode maps to QoS: fire-and-forget is QoS 0 and `publish` returns
//! once the request is handed to the client's event loop. Acknowledged is
//! QoS 1 and `publish` waits for the matching PUBACK. Both are bounded by the
//! send timeout, and an event loop failure fails every later `publish`.
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::transport::config::split_host_port;
use crate::transport::{ConnectOptions, Delivery, Publisher, Transport, TransportError};

const DEFAULT_PORT: u16 = 1883;
const DEFAULT_SEND_TIMEOUT_MS: u64 = 5000;
const CONNACK_TIMEOUT: Duration = Duration::from_secs(5);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct MqttTransport {
    host: String,
    port: u16,
    keep_alive: Duration,
    qos: QoS,
    send_timeout: Duration,
}

pub async fn connect(opts: ConnectOptions) -> Result<Box<dyn Transport>, TransportError> {
    Ok(Box::new(build(&opts)?))
}

fn build(opts: &ConnectOptions) -> Result<MqttTransport, TransportError> {
    let (host, port) = match opts.endpoint() {
        Some(ep) => split_host_port(ep, DEFAULT_PORT)
            .ok_or_else(|| TransportError::Config(format!("invalid endpoint '{ep}'")))?,
        None => {
            let host = opts
                .params
                .get("host")
                .cloned()
                .unwrap_or_else(|| "127.0.0.1".into());
            let port = opts
                .params
                .get("port")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_PORT);
            (host, port)
        }
    };
    let qos = match opts.delivery()? {
        Delivery::FireAndForget => QoS::AtMostOnce,
        Delivery::Acknowledged => QoS::AtLeastOnce,
    };
    let send_timeout = Duration::from_millis(opts.send_timeout_ms(DEFAULT_SEND_TIMEOUT_MS)?);
    Ok(MqttTransport {
        host,
        port,
        keep_alive: Duration::from_secs(30),
        qos,
        send_timeout,
    })
}

impl MqttTransport {
    fn options(&self, prefix: &str) -> MqttOptions {
        let mut options = MqttOptions::new(
            format!("{}-{}", prefix, uuid::Uuid::new_v4()),
            self.host.clone(),
            self.port,
        );
        options.set_keep_alive(self.keep_alive);
        options
    }
}

#[async_trait::async_trait]
impl Transport for MqttTransport {
    async fn create_publisher(&self, topic: &str) -> Result<Box<dyn Publisher>, TransportError> {
        // Dedicated client + background poller for each channel handle
        let (client, eventloop) = AsyncClient::new(self.options("pub"), 100);
        let (state, link) = watch::channel(LinkState::default());
        let poller = spawn_poller(eventloop, state, format!("{}:{}", self.host, self.port));
        Ok(Box::new(MqttPublisher {
            client,
            topic: topic.to_string(),
            qos: self.qos,
            send_timeout: self.send_timeout,
            queued: AtomicU64::new(0),
            link,
            poller,
        }))
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), TransportError> {
        // Short-lived client; healthy once the broker answers CONNECT.
        let (client, mut eventloop) = AsyncClient::new(self.options("check"), 10);
        let connack = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => break Ok(()),
                    Ok(_) => {}
                    Err(e) => break Err(TransportError::Connect(e.to_string())),
                }
            }
        };
        let res = tokio::time::timeout(CONNACK_TIMEOUT, connack)
            .await
            .map_err(|_| TransportError::Timeout)?;
        let _ = client.try_disconnect();
        res
    }
}

/// What the poller has seen so far, shared with the publisher.
#[derive(Debug, Default)]
struct LinkState {
    /// PUBACKs received; QoS 1 acks arrive in publish order.
    acked: u64,
    /// First event loop error. The poller stops after it.
    failure: Option<String>,
    /// The poller has exited.
    closed: bool,
}

fn spawn_poller(
    mut eventloop: EventLoop,
    state: watch::Sender<LinkState>,
    target: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::PubAck(_))) => state.send_modify(|s| s.acked += 1),
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    tracing::debug!(%target, "mqtt disconnect sent");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(%target, error = %e, "mqtt event loop stopped");
                    state.send_modify(|s| s.failure = Some(e.to_string()));
                    break;
                }
            }
        }
        state.send_modify(|s| s.closed = true);
    })
}

struct MqttPublisher {
    client: AsyncClient,
    topic: String,
    qos: QoS,
    send_timeout: Duration,
    // QoS 1 publishes handed to the event loop
    queued: AtomicU64,
    link: watch::Receiver<LinkState>,
    poller: JoinHandle<()>,
}

impl MqttPublisher {
    fn failure(&self) -> Option<String> {
        self.link.borrow().failure.clone()
    }

    async fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        self.client
            .publish(&self.topic, self.qos, false, payload.to_vec())
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?;
        if self.qos == QoS::AtMostOnce {
            return Ok(());
        }

        let seq = self.queued.fetch_add(1, Ordering::SeqCst) + 1;
        let mut link = self.link.clone();
        let state = link
            .wait_for(|s| s.acked >= seq || s.closed)
            .await
            .map_err(|_| TransportError::Disconnected)?;
        if state.acked >= seq {
            return Ok(());
        }
        Err(match &state.failure {
            Some(reason) => TransportError::Publish(format!("connection lost: {reason}")),
            None => TransportError::Disconnected,
        })
    }
}

#[async_trait::async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, payload: Bytes) -> Result<(), TransportError> {
        if let Some(reason) = self.failure() {
            return Err(TransportError::Publish(format!("connection lost: {reason}")));
        }
        tokio::time::timeout(self.send_timeout, self.send(payload))
            .await
            .map_err(|_| TransportError::Timeout)?
    }

    /// Queue a DISCONNECT behind any pending publishes and let the poller
    /// write it out, bounded by `FLUSH_TIMEOUT`.
    async fn shutdown(&self) -> Result<(), TransportError> {
        let mut link = self.link.clone();
        let flush = async {
            let closed = link.borrow().closed;
            if !closed {
                self.client
                    .disconnect()
                    .await
                    .map_err(|e| TransportError::Other(e.to_string()))?;
            }
            link.wait_for(|s| s.closed)
                .await
                .map_err(|_| TransportError::Disconnected)?;
            Ok::<(), TransportError>(())
        };
        let res = tokio::time::timeout(FLUSH_TIMEOUT, flush)
            .await
            .unwrap_or(Err(TransportError::Timeout));
        self.poller.abort();
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{OPT_DELIVERY, OPT_ENDPOINT, OPT_SEND_TIMEOUT_MS};

    fn options(endpoint: &str, delivery: Delivery) -> ConnectOptions {
        let mut opts = ConnectOptions::default();
        opts.params.insert(OPT_ENDPOINT.into(), endpoint.into());
        opts.params.insert(OPT_DELIVERY.into(), delivery.as_str().into());
        opts.params.insert(OPT_SEND_TIMEOUT_MS.into(), "200".into());
        opts
    }

    /// Address with nothing listening on it.
    async fn refused_endpoint() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr.to_string()
    }

    #[tokio::test]
    async fn dead_broker_fails_publish() {
        for delivery in [Delivery::Acknowledged, Delivery::FireAndForget] {
            let transport = connect(options(&refused_endpoint().await, delivery))
                .await
                .unwrap();
            let publisher = transport.create_publisher("random_data").await.unwrap();

            let mut outcome = Ok(());
            for _ in 0..20 {
                outcome = tokio::time::timeout(
                    Duration::from_secs(2),
                    publisher.publish(Bytes::from_static(b"42")),
                )
                .await
                .expect("publish must not hang");
                if outcome.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            assert!(outcome.is_err(), "{delivery:?} never reported the dead broker");

            // Poller already gone; release returns without waiting out the flush bound
            tokio::time::timeout(Duration::from_secs(1), publisher.shutdown())
                .await
                .expect("shutdown must not hang")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn unanswered_publish_times_out() {
        // Accepts TCP but never answers CONNECT
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        let silent = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let transport = connect(options(&endpoint, Delivery::Acknowledged))
            .await
            .unwrap();
        let publisher = transport.create_publisher("structured_data").await.unwrap();
        let err = tokio::time::timeout(
            Duration::from_secs(2),
            publisher.publish(Bytes::from_static(b"{}")),
        )
        .await
        .expect("publish must be bounded by the send timeout")
        .unwrap_err();
        assert!(matches!(err, TransportError::Timeout));
        assert!(err.is_recoverable());

        // Either the connect attempt gives up or the flush bound expires first
        let _ = tokio::time::timeout(FLUSH_TIMEOUT + Duration::from_secs(1), publisher.shutdown())
            .await
            .expect("shutdown bounded by the flush timeout");
        silent.abort();
    }

    #[test]
    fn delivery_and_timeout_come_from_options() {
        let t = build(&options("broker:1884", Delivery::FireAndForget)).unwrap();
        assert_eq!((t.host.as_str(), t.port), ("broker", 1884));
        assert_eq!(t.qos, QoS::AtMostOnce);
        assert_eq!(t.send_timeout, Duration::from_millis(200));

        let t = build(&ConnectOptions::default()).unwrap();
        assert_eq!((t.host.as_str(), t.port), ("127.0.0.1", DEFAULT_PORT));
        assert_eq!(t.qos, QoS::AtLeastOnce);
        assert_eq!(t.send_timeout, Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS));
    }
}
