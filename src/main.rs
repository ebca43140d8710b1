use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use pin_harvest::collector::{ImageCandidateCollector, WebDriverSessionFactory};
use pin_harvest::config::HarvestConfig;
use pin_harvest::downloader::{Downloader, HttpFetcher};
use pin_harvest::orchestrator::Orchestrator;
use pin_harvest::worklist::WorklistStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = HarvestConfig::from_env().context("Invalid configuration")?;

    // Console and log file
    let log_dir = config
        .log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
    let log_name = config
        .log_file
        .file_name()
        .context("HARVEST_LOG_FILE has no file name")?;
    let (file_writer, _log_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, log_name));
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    eprintln!("📌 pin-harvest v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Worklist: {}", config.worklist_path.display());
    eprintln!("   Output:   {}", config.output_dir.display());
    eprintln!("   Driver:   {}", config.webdriver_url);
    if config.extract_only {
        eprintln!("   Mode:     extract only");
    }

    let sessions = Arc::new(WebDriverSessionFactory::new(
        config.webdriver_url.clone(),
        config.headless,
        config.downloader.user_agent.clone(),
    ));
    let collector = ImageCandidateCollector::new(sessions, config.collector.clone());
    let fetcher = Arc::new(HttpFetcher::new(&config.downloader).context("Failed to build HTTP client")?);
    let downloader = Downloader::new(fetcher, config.downloader.clone());
    let store = WorklistStore::new(config.worklist_path.clone(), config.default_image_count);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; finishing the current step");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut orchestrator = Orchestrator::new(store, collector, downloader, config.output_dir.clone())
        .with_extract_only(config.extract_only)
        .with_shutdown(shutdown_rx);

    let summary = orchestrator.run().await.context("Harvest run aborted")?;
    eprintln!(
        "Done: {} terms completed, {} failed, {} images saved",
        summary.done(),
        summary.failed(),
        summary.images_saved()
    );
    Ok(())
}
