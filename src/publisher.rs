//! Publish loop: one unstructured and one structured sample per cycle, each to
//! its own channel handle, until cancelled or a cycle limit is reached.
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::metrics::stats::Stats;
use crate::payload::{RandomSource, generate_structured, generate_unstructured};
use crate::rate::RateController;
use crate::transport::{Publisher, Transport, TransportBuilder, TransportError};

#[derive(thiserror::Error, Debug)]
pub enum PublisherError {
    /// Broker could not be reached or a channel handle could not be opened.
    #[error("connecting to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: TransportError,
    },
    /// A send failed mid-run.
    #[error("sending to topic {topic}: {source}")]
    Send {
        topic: String,
        #[source]
        source: TransportError,
    },
    #[error("serializing sample: {0}")]
    Serialization(#[from] serde_json::Error),
    /// A handle or the transport failed to shut down cleanly.
    #[error("releasing {target}: {source}")]
    Release {
        target: String,
        #[source]
        source: TransportError,
    },
}

impl PublisherError {
    /// Startup and send failures both mean the broker is unusable.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Send { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    CycleLimit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopSummary {
    pub cycles: u64,
    pub sent: u64,
    pub reason: StopReason,
}

#[derive(Clone, Copy, Debug)]
pub struct LoopConfig {
    pub interval: Duration,
    pub max_cycles: Option<u64>,
}

impl From<&Settings> for LoopConfig {
    fn from(s: &Settings) -> Self {
        Self {
            interval: s.interval(),
            max_cycles: s.max_cycles,
        }
    }
}

/// Channel handle: a publisher bound to one topic.
pub struct Channel {
    topic: String,
    publisher: Box<dyn Publisher>,
}

impl Channel {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    async fn send(&self, payload: Bytes, stats: &Stats) -> Result<(), PublisherError> {
        let started = Instant::now();
        match self.publisher.publish(payload).await {
            Ok(()) => {
                stats.record_sent(started.elapsed()).await;
                Ok(())
            }
            Err(source) => {
                stats.record_error().await;
                debug!(
                    topic = %self.topic,
                    recoverable = source.is_recoverable(),
                    error = %source,
                    "send failed"
                );
                Err(PublisherError::Send {
                    topic: self.topic.clone(),
                    source,
                })
            }
        }
    }

    async fn release(self) -> Result<(), TransportError> {
        self.publisher.shutdown().await
    }
}

/// Everything the loop owns: the transport and both channel handles.
pub struct PublisherContext {
    transport: Box<dyn Transport>,
    unstructured: Channel,
    structured: Channel,
}

impl PublisherContext {
    /// Connect with the configured engine, check the broker, open both handles.
    pub async fn connect(settings: &Settings) -> Result<Self, PublisherError> {
        let engine = settings.engine().map_err(|e| PublisherError::Connect {
            target: settings.broker().to_string(),
            source: TransportError::Config(e.to_string()),
        })?;
        let transport = TransportBuilder::connect(engine.clone(), settings.connect_options())
            .await
            .map_err(|source| PublisherError::Connect {
                target: settings.broker().to_string(),
                source,
            })?;
        info!(%engine, broker = settings.broker(), "transport connected");
        Self::open(
            transport,
            settings.broker(),
            &settings.unstructured_topic,
            &settings.structured_topic,
        )
        .await
    }

    /// Health-check `transport` and open one channel handle per topic.
    pub async fn open(
        transport: Box<dyn Transport>,
        broker: &str,
        unstructured_topic: &str,
        structured_topic: &str,
    ) -> Result<Self, PublisherError> {
        let connect_err = |source: TransportError| PublisherError::Connect {
            target: broker.to_string(),
            source,
        };
        if let Err(e) = transport.health_check().await {
            let _ = transport.shutdown().await;
            return Err(connect_err(e));
        }
        let unstructured = match transport.create_publisher(unstructured_topic).await {
            Ok(p) => p,
            Err(e) => {
                let _ = transport.shutdown().await;
                return Err(connect_err(e));
            }
        };
        let structured = match transport.create_publisher(structured_topic).await {
            Ok(p) => p,
            Err(e) => {
                let _ = unstructured.shutdown().await;
                let _ = transport.shutdown().await;
                return Err(connect_err(e));
            }
        };
        debug!(unstructured_topic, structured_topic, "channel handles open");
        Ok(Self {
            transport,
            unstructured: Channel {
                topic: unstructured_topic.to_string(),
                publisher: unstructured,
            },
            structured: Channel {
                topic: structured_topic.to_string(),
                publisher: structured,
            },
        })
    }

    pub fn unstructured(&self) -> &Channel {
        &self.unstructured
    }

    pub fn structured(&self) -> &Channel {
        &self.structured
    }

    /// Release both handles, then the transport. Consumes the context.
    pub async fn release(self) -> Result<(), PublisherError> {
        let Self {
            transport,
            unstructured,
            structured,
        } = self;
        let (u_topic, s_topic) = (unstructured.topic.clone(), structured.topic.clone());
        let (u, s) = futures::future::join(unstructured.release(), structured.release()).await;
        let t = transport.shutdown().await;
        for (target, res) in [(u_topic, u), (s_topic, s), ("transport".to_string(), t)] {
            if let Err(source) = res {
                return Err(PublisherError::Release { target, source });
            }
        }
        debug!("channel handles released");
        Ok(())
    }
}

/// Cancel `token` once `signal` fires. A signal listener that fails to
/// install leaves the token alone so the loop keeps running.
pub async fn cancel_on_signal<F>(signal: F, token: CancellationToken)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            info!("Ctrl+C received, stopping publisher");
            token.cancel();
        }
        Err(e) => warn!(error = %e, "could not listen for Ctrl+C; stop with a cycle limit or kill"),
    }
}

/// Run the publish loop until `token` is cancelled, the cycle limit is hit, or
/// a send fails. Both handles are released on every exit path.
pub async fn run_publish_loop<S: RandomSource + ?Sized>(
    ctx: PublisherContext,
    source: &mut S,
    config: LoopConfig,
    stats: Arc<Stats>,
    token: CancellationToken,
) -> Result<LoopSummary, PublisherError> {
    let outcome = drive(&ctx, source, config, &stats, &token).await;
    let released = ctx.release().await;

    match (outcome, released) {
        (Ok(summary), Ok(())) => Ok(summary),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), released) => {
            if let Err(re) = released {
                warn!(error = %re, "release after failure also failed");
            }
            Err(e)
        }
    }
}

async fn drive<S: RandomSource + ?Sized>(
    ctx: &PublisherContext,
    source: &mut S,
    config: LoopConfig,
    stats: &Stats,
    token: &CancellationToken,
) -> Result<LoopSummary, PublisherError> {
    let mut rate = RateController::new(config.interval);
    let mut cycle = 0u64;
    debug!(
        interval_ms = rate.interval().as_millis() as u64,
        max_cycles = ?config.max_cycles,
        "publish loop running"
    );
    let stop = |cycle: u64, reason| LoopSummary {
        cycles: cycle,
        sent: cycle * 2,
        reason,
    };
    loop {
        if token.is_cancelled() {
            return Ok(stop(cycle, StopReason::Cancelled));
        }
        if config.max_cycles.is_some_and(|max| cycle >= max) {
            return Ok(stop(cycle, StopReason::CycleLimit));
        }
        rate.start_cycle();

        let sample = generate_unstructured(source);
        ctx.unstructured.send(sample, stats).await?;
        let sample = generate_structured(source)?;
        ctx.structured.send(sample, stats).await?;

        cycle += 1;
        stats.record_cycle().await;
        debug!(cycle, "cycle complete");

        if config.max_cycles.is_some_and(|max| cycle >= max) {
            return Ok(stop(cycle, StopReason::CycleLimit));
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(stop(cycle, StopReason::Cancelled)),
            _ = rate.wait_for_next() => {}
        }
    }
}
