use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use pump_scan::application::{BatchOrchestrator, RunSummary, SharedAccumulator};
use pump_scan::infrastructure::logging::{init_logging, log_system_info};
use pump_scan::infrastructure::{ChromiumAutomation, JsonFileSink, ScanConfig, SnapshotSink};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match ScanConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    let _logging_guard = match init_logging(&config.logging_config()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("❌ Failed to initialize logging: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    log_system_info();
    config.log_summary();
    info!("🔗 Starting parallelized headless crawl to fetch tokens from pump.fun");

    match run(&config).await {
        Ok(summary) => {
            info!(
                "Run finished: {} attempts dispatched, {} skipped, {} failed, {} listing responses ({} malformed)",
                summary.attempts_dispatched,
                summary.attempts_skipped,
                summary.attempts_failed,
                summary.responses_seen,
                summary.malformed_payloads
            );
            match serde_json::to_string(&summary) {
                Ok(json) => debug!(summary = %json, "Run summary"),
                Err(e) => debug!("Run summary not serializable: {}", e),
            }
            info!("🚀 Done");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("❌ Run could not start: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &ScanConfig) -> Result<RunSummary> {
    let accumulator = SharedAccumulator::new(config.target).context("Invalid target")?;
    let orchestrator_config = config.orchestrator_config()?;
    let sink = Arc::new(JsonFileSink::new(&config.output_path));

    let automation = match ChromiumAutomation::launch(&config.browser_options()).await {
        Ok(automation) => Arc::new(automation),
        Err(e) => {
            error!("❌ Crawler run failed: {}", e);
            return Ok(write_without_dispatch(&accumulator, sink.as_ref()).await);
        }
    };

    let cancellation = CancellationToken::new();
    let ctrl_c = tokio::spawn({
        let cancellation = cancellation.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("🛑 Interrupted: finishing in-flight batches, no new ones will start");
                cancellation.cancel();
            }
        }
    });

    let summary = BatchOrchestrator::new(
        Arc::clone(&automation),
        Arc::clone(&sink),
        accumulator,
        orchestrator_config,
    )
    .with_cancellation(cancellation)
    .run()
    .await;

    ctrl_c.abort();
    match Arc::try_unwrap(automation) {
        Ok(automation) => automation.shutdown().await,
        Err(_) => warn!("Browser still referenced at shutdown; leaving it to process exit"),
    }

    info!("📁 Output written to {}", sink.path().display());
    Ok(summary)
}

/// Final write when the browser never came up.
async fn write_without_dispatch(accumulator: &SharedAccumulator, sink: &JsonFileSink) -> RunSummary {
    let snapshot = accumulator.snapshot().await;
    let written = match sink.write_snapshot(&snapshot).await {
        Ok(written) => {
            info!("📁 Final saved {} tokens to {}", written, sink.path().display());
            Some(written)
        }
        Err(e) => {
            error!("❌ Final snapshot write failed: {}", e);
            None
        }
    };

    RunSummary {
        collected: snapshot.len(),
        written,
        ..RunSummary::default()
    }
}
