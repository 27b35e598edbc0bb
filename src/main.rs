use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use synth_pub::config::{Overrides, Settings};
use synth_pub::logging;
use synth_pub::metrics::stats::Stats;
use synth_pub::output::{OutputWriter, spawn_reporter};
use synth_pub::payload::RngSource;
use synth_pub::publisher::{
    LoopConfig, PublisherContext, StopReason, cancel_on_signal, run_publish_loop,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "synth-pub")]
#[command(about = "Publish synthetic samples to two broker topics at a fixed cadence")]
struct Cli {
    /// YAML settings file; command-line flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    settings.apply(cli.overrides);
    settings.validate()?;

    logging::init(&settings.log_level)?;

    info!(
        engine = %settings.engine,
        broker = settings.broker(),
        unstructured_topic = %settings.unstructured_topic,
        structured_topic = %settings.structured_topic,
        interval_ms = settings.interval_ms,
        delivery = settings.delivery.as_str(),
        "starting synthetic publisher"
    );
    match settings.max_cycles {
        Some(n) => info!(cycles = n, "running for a fixed number of cycles"),
        None => info!("running until Ctrl+C"),
    }

    let token = CancellationToken::new();
    let ctrl_c = tokio::spawn(cancel_on_signal(tokio::signal::ctrl_c(), token.clone()));

    let ctx = match PublisherContext::connect(&settings).await {
        Ok(ctx) => ctx,
        Err(e) => {
            error!(error = %e, "broker unavailable at startup");
            return Err(e).context("startup failed");
        }
    };
    info!(
        unstructured = ctx.unstructured().topic(),
        structured = ctx.structured().topic(),
        "channel handles ready"
    );

    let stats = Arc::new(Stats::new());
    let output = match &settings.csv {
        Some(path) => OutputWriter::new_csv(path)?,
        None => OutputWriter::new_log(),
    };
    let reporter_stop = CancellationToken::new();
    let reporter = spawn_reporter(
        stats.clone(),
        output,
        Duration::from_secs(settings.snapshot_interval_secs),
        reporter_stop.clone(),
    );

    let mut source = RngSource::new(settings.seed);
    let result = run_publish_loop(
        ctx,
        &mut source,
        LoopConfig::from(&settings),
        stats.clone(),
        token,
    )
    .await;

    // Final statistics
    reporter_stop.cancel();
    ctrl_c.abort();
    let final_stats = stats.snapshot().await;
    match reporter.await {
        Ok(mut out) => {
            if let Err(e) = out.write_snapshot(&final_stats) {
                warn!(error = %e, "failed to write final snapshot");
            }
        }
        Err(e) => warn!(error = %e, "statistics reporter ended abnormally"),
    }
    info!(
        cycles = final_stats.cycles,
        sent = final_stats.sent_count,
        errors = final_stats.error_count,
        avg_rate = format_args!("{:.2}", final_stats.avg_send_rate()),
        p99_us = final_stats.latency_us_p99,
        elapsed_secs = format_args!("{:.2}", final_stats.elapsed_secs),
        "final publisher statistics"
    );

    match result {
        Ok(summary) => {
            let how = match summary.reason {
                StopReason::Cancelled => "interrupted",
                StopReason::CycleLimit => "cycle limit reached",
            };
            info!(cycles = summary.cycles, sent = summary.sent, "publisher stopped: {how}");
            Ok(())
        }
        Err(e) => {
            if e.is_connection() {
                error!(error = %e, "broker failure, publisher terminated");
            } else {
                error!(error = %e, "publisher terminated");
            }
            Err(e.into())
        }
    }
}
