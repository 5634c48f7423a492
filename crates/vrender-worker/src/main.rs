//! Render worker binary.
//!
//! Renders every path given on the command line, one after another, and exits
//! once all of them have finished or a shutdown signal arrives.

use anyhow::{bail, Context};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vrender_media::{ToolPaths, VapourSynthCommandBuilder};
use vrender_models::{JobParams, JobStatus};
use vrender_queue::{Job, QueueConfig, QueueEvent, RenderQueue};
use vrender_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env();
    init_tracing(config.json_logs)?;

    info!("Starting vrender-worker");
    info!("Worker config: {:?}", config);

    let sources: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if sources.is_empty() {
        bail!("usage: vrender-worker <video>...");
    }

    if let Some(addr) = config.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Serving metrics on {}", addr);
    }

    let tools = ToolPaths::from_env()
        .resolved()
        .context("Render tools are not available")?;
    info!("Using tools: {:?}", tools);

    let queue = RenderQueue::start(
        QueueConfig::from_env(),
        Arc::new(VapourSynthCommandBuilder::new(tools)),
    );
    let mut events = queue.subscribe();

    let mut remaining = 0usize;
    for source in sources {
        let mut params = JobParams::new(source);
        if let Some(path) = &config.config_override {
            params = params.with_config_override(path);
        }
        let job = Job::new(params);
        info!(
            "Queued {} -> {}",
            job.params().source.display(),
            job.output_path().display()
        );
        queue.enqueue(job)?;
        remaining += 1;
    }

    let mut failed = 0usize;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    while remaining > 0 {
        tokio::select! {
            _ = &mut shutdown => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                if let QueueEvent::Finished { job_id, outcome } = &event {
                    remaining -= 1;
                    match outcome.status {
                        JobStatus::Completed => info!(job_id = %job_id, "Render completed"),
                        JobStatus::Cancelled => warn!(job_id = %job_id, "Render cancelled"),
                        _ => {
                            failed += 1;
                            error!(
                                job_id = %job_id,
                                "Render failed: {}",
                                outcome.error_message.as_deref().unwrap_or("unknown error")
                            );
                        }
                    }
                }
            }
        }
    }

    queue.shutdown().await?;
    info!("Worker shutdown complete");

    if failed > 0 {
        bail!("{failed} render(s) failed");
    }
    Ok(())
}

/// Coloured output for dev, JSON for production.
fn init_tracing(json: bool) -> anyhow::Result<()> {
    let env_filter = EnvFilter::from_default_env().add_directive("vrender=info".parse()?);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Received shutdown signal");
}
