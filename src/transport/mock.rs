//! In-memory broker (feature `transport-mock`) for tests and dry runs.
//!
//! Every successful publish is delivered on a flume channel that a test can
//! drain. Failures can be injected at a given publish attempt, at startup, or
//! when channel handles are released.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;

use crate::transport::{ConnectOptions, Publisher, Transport, TransportError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MockRecord {
    pub topic: String,
    pub payload: Bytes,
}

#[derive(Default)]
struct MockState {
    attempts: AtomicU64,
    publisher_releases: AtomicU64,
    transport_releases: AtomicU64,
    // 1-based publish attempt that fails
    fail_at: Option<u64>,
    unreachable: bool,
    fail_release: AtomicBool,
}

/// Test-side view of a mock broker.
pub struct MockBroker {
    state: Arc<MockState>,
    tx: flume::Sender<MockRecord>,
    rx: flume::Receiver<MockRecord>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::with_state(MockState::default())
    }

    /// Broker whose `n`-th publish attempt (counted across all topics) fails.
    pub fn failing_at(n: u64) -> Self {
        Self::with_state(MockState {
            fail_at: Some(n),
            ..Default::default()
        })
    }

    /// Broker that fails its health check.
    pub fn unreachable() -> Self {
        Self::with_state(MockState {
            unreachable: true,
            ..Default::default()
        })
    }

    /// From now on every channel handle fails to release (still counted).
    pub fn fail_releases(&self) {
        self.state.fail_release.store(true, Ordering::SeqCst);
    }

    fn with_state(state: MockState) -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            state: Arc::new(state),
            tx,
            rx,
        }
    }

    pub fn transport(&self) -> Box<dyn Transport> {
        Box::new(MockTransport {
            state: self.state.clone(),
            tx: self.tx.clone(),
        })
    }

    /// Drain records delivered so far, in publish order.
    pub fn take_published(&self) -> Vec<MockRecord> {
        self.rx.try_iter().collect()
    }

    pub fn publish_attempts(&self) -> u64 {
        self.state.attempts.load(Ordering::SeqCst)
    }

    pub fn publisher_releases(&self) -> u64 {
        self.state.publisher_releases.load(Ordering::SeqCst)
    }

    pub fn transport_releases(&self) -> u64 {
        self.state.transport_releases.load(Ordering::SeqCst)
    }
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder entry point. Records go nowhere since no `MockBroker` outlives
/// the call; `fail_at=<n>`, `unreachable=true` and `fail_release=true` are
/// honoured.
pub async fn connect(opts: ConnectOptions) -> Result<Box<dyn Transport>, TransportError> {
    let fail_at = match opts.params.get("fail_at") {
        Some(v) => Some(
            v.parse::<u64>()
                .map_err(|_| TransportError::Config(format!("invalid fail_at '{v}'")))?,
        ),
        None => None,
    };
    let unreachable = opts
        .params
        .get("unreachable")
        .is_some_and(|v| v == "true");
    let fail_release = opts
        .params
        .get("fail_release")
        .is_some_and(|v| v == "true");
    let broker = MockBroker::with_state(MockState {
        fail_at,
        unreachable,
        fail_release: AtomicBool::new(fail_release),
        ..Default::default()
    });
    Ok(broker.transport())
}

struct MockTransport {
    state: Arc<MockState>,
    tx: flume::Sender<MockRecord>,
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn create_publisher(&self, topic: &str) -> Result<Box<dyn Publisher>, TransportError> {
        Ok(Box::new(MockPublisher {
            topic: topic.to_string(),
            state: self.state.clone(),
            tx: self.tx.clone(),
        }))
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.state.transport_releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), TransportError> {
        if self.state.unreachable {
            return Err(TransportError::Connect("mock broker unreachable".into()));
        }
        Ok(())
    }
}

struct MockPublisher {
    topic: String,
    state: Arc<MockState>,
    tx: flume::Sender<MockRecord>,
}

#[async_trait::async_trait]
impl Publisher for MockPublisher {
    async fn publish(&self, payload: Bytes) -> Result<(), TransportError> {
        let attempt = self.state.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.state.fail_at == Some(attempt) {
            return Err(TransportError::Publish(format!(
                "injected failure on attempt {attempt}"
            )));
        }
        // Receiver gone means nobody is observing; the payload is dropped.
        let _ = self.tx.send(MockRecord {
            topic: self.topic.clone(),
            payload,
        });
        tracing::trace!(topic = %self.topic, attempt, "mock publish");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.state.publisher_releases.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_release.load(Ordering::SeqCst) {
            return Err(TransportError::Other(format!(
                "injected release failure on {}",
                self.topic
            )));
        }
        Ok(())
    }
}
