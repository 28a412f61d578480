//! Video analysis worker binary.
//!
//! Usage: `vlens-worker <job.json>`. Prints the job result as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vlens_ai_client::{GeminiClient, OffsetClipExtractor};
use vlens_worker::metrics::init_metrics;
use vlens_worker::request::JobRequest;
use vlens_worker::{JobRegistry, Orchestrator, WorkerConfig};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let metrics = match init_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Metrics recorder not installed: {}", e);
            None
        }
    };

    let outcome = run().await;

    if let Some(handle) = metrics {
        debug!("Metrics snapshot:\n{}", handle.render());
    }

    if let Err(e) = outcome {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vlens_worker=info,vlens_ai_client=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
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
                    .with_line_number(false)
                    .with_writer(std::io::stderr),
            )
            .with(env_filter)
            .init();
    }
}

async fn run() -> anyhow::Result<()> {
    let path: PathBuf = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: vlens-worker <job.json>")?;

    let raw = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let request: JobRequest = serde_json::from_str(&raw)
        .with_context(|| format!("invalid job request in {}", path.display()))?;
    let job = request.into_job()?;

    let config = WorkerConfig::from_env()?;
    info!("Worker config: {:?}", config);

    let backend = Arc::new(GeminiClient::from_env()?);
    let orchestrator = Orchestrator::new(
        backend,
        Arc::new(OffsetClipExtractor),
        config,
        JobRegistry::new(),
    );

    info!(job_id = %job.job_id, "Starting vlens-worker job");
    let result = orchestrator.run(job).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
