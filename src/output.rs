use crate::metrics::stats::{Stats, StatsSnapshot};
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

/// Destination for periodic statistics snapshots.
pub enum OutputWriter {
    Csv {
        writer: csv::Writer<File>,
        path: PathBuf,
    },
    /// Snapshots go to the `debug` log only, keeping the default level quiet
    Log,
}

impl OutputWriter {
    pub fn new_csv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let writer = csv::Writer::from_path(&path)
            .with_context(|| format!("opening CSV output {}", path.display()))?;
        tracing::info!(path = %path.display(), "writing statistics snapshots as CSV");
        Ok(Self::Csv { writer, path })
    }

    pub fn new_log() -> Self {
        Self::Log
    }

    pub fn write_snapshot(&mut self, snapshot: &StatsSnapshot) -> Result<()> {
        match self {
            Self::Csv { writer, path } => {
                writer
                    .serialize(snapshot)
                    .with_context(|| format!("writing {}", path.display()))?;
                // Flush so external tail/readers see progress promptly
                writer.flush()?;
            }
            Self::Log => {
                tracing::debug!(
                    cycles = snapshot.cycles,
                    sent = snapshot.sent_count,
                    errors = snapshot.error_count,
                    rate_avg = format_args!("{:.2}", snapshot.avg_send_rate()),
                    rate_inst = format_args!("{:.2}", snapshot.interval_send_rate()),
                    p99_us = snapshot.latency_us_p99,
                    "publisher stats"
                );
            }
        }
        Ok(())
    }
}

/// Write a snapshot every `every` until `token` is cancelled, then hand the
/// writer back for the final snapshot.
pub fn spawn_reporter(
    stats: Arc<Stats>,
    mut output: OutputWriter,
    every: Duration,
    token: CancellationToken,
) -> JoinHandle<OutputWriter> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let snap = stats.snapshot().await;
                    if let Err(e) = output.write_snapshot(&snap) {
                        tracing::warn!(error = %e, "failed to write statistics snapshot");
                    }
                }
            }
        }
        output
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn csv_has_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("stats.csv");
        let stats = Stats::new();
        stats.record_sent(Duration::from_micros(50)).await;

        let mut out = OutputWriter::new_csv(&path).unwrap();
        out.write_snapshot(&stats.snapshot().await).unwrap();
        out.write_snapshot(&stats.snapshot().await).unwrap();
        drop(out);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("timestamp,cycles,sent_count,error_count"));
        let mut reader = csv::Reader::from_path(&path).unwrap();
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(&row[2], "1");
    }

    #[tokio::test(start_paused = true)]
    async fn reporter_returns_writer_on_cancel() {
        let token = CancellationToken::new();
        let handle = spawn_reporter(
            Arc::new(Stats::new()),
            OutputWriter::new_log(),
            Duration::from_secs(1),
            token.clone(),
        );
        tokio::time::sleep(Duration::from_secs(3)).await;
        token.cancel();
        let out = handle.await.unwrap();
        assert!(matches!(out, OutputWriter::Log));
    }
}
