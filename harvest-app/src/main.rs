use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use harvest_common::observability::{LogConfig, LogFormat, init_logging};
use harvest_config::{HarvestConfig, HarvestConfigLoader};
use harvest_web::Orchestrator;
use rate::TokenBuckets;
use server::{AppState, router};
mod rate;
mod server;

const DEFAULT_CONFIG_FILE: &str = "harvest.yaml";

/// Email and business-listing scraper behind a rate-limited HTTP API.
#[derive(Debug, Parser)]
#[command(name = "harvest", version)]
struct Cli {
    /// YAML configuration file; `harvest.yaml` is read when present.
    #[arg(long, env = "HARVEST_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
}

fn load_config(cli: &Cli) -> Result<HarvestConfig> {
    let loader = match &cli.config {
        Some(path) => HarvestConfigLoader::new().with_file(path),
        None => HarvestConfigLoader::new().with_optional_file(DEFAULT_CONFIG_FILE),
    };
    let mut cfg = loader.load().context("loading configuration")?;
    if let Some(host) = &cli.host {
        cfg.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        cfg.server.port = port;
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(&cli)?;

    let log_path = init_logging(LogConfig {
        log_dir: cfg.logging.dir.as_ref().map(PathBuf::from),
        emit_stderr: cfg.logging.stderr,
        format: LogFormat::from_name(&cfg.logging.format),
        default_filter: cfg.logging.level.clone(),
        ..LogConfig::default()
    })?;

    let state = AppState {
        orchestrator: Arc::new(Orchestrator::from_config(&cfg)?),
        limiter: Arc::new(TokenBuckets::per_minute(
            cfg.rate_limit.requests_per_minute,
            cfg.rate_limit.burst,
        )),
    };

    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(
        target: "harvest.server",
        %addr,
        log = %log_path.display(),
        webdriver = %cfg.browser.webdriver_url,
        proxied = cfg.browser.proxy.is_some(),
        "server.listening"
    );

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!(target: "harvest.server", "server.stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(target: "harvest.server", error = %err, "server.signal_failed");
        std::future::pending::<()>().await;
    }
}
