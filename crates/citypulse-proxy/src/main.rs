//! CityPulse offline cache proxy.
//!
//! Runs one proxy version in front of the CityPulse origin: precaches the
//! app shell at startup, then answers page traffic through the caching
//! strategies and keeps serving it when the origin is unreachable.

mod server;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use citypulse_common::{init_logging, LogConfig, LogFormat};
use citypulse_core::ProxyConfig;
use citypulse_net::{Fetcher, LoaderConfig, ResourceLoader};
use citypulse_sw::OfflineCacheProxy;

use crate::server::{log_events, router, AppState};

#[derive(Parser, Debug)]
#[command(name = "citypulse-proxy")]
#[command(about = "Offline cache proxy for the CityPulse web app")]
struct Args {
    /// Path to a JSON proxy configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Override the configured origin
    #[arg(long)]
    origin: Option<String>,

    /// Log format: pretty, compact or json
    #[arg(long, default_value = "pretty")]
    log_format: String,

    /// Enable verbose output
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let format: LogFormat = args.log_format.parse()?;
    let log = if args.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default()
    };
    init_logging(log.with_format(format))?;

    let mut config = match &args.config {
        Some(path) => ProxyConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ProxyConfig::default(),
    };
    if let Some(origin) = args.origin {
        config.origin = origin;
    }

    let upstream: Arc<dyn Fetcher> =
        Arc::new(ResourceLoader::new(LoaderConfig::reverse_proxy())?);
    let (proxy, events) = OfflineCacheProxy::new(config, upstream.clone())?;
    tokio::spawn(log_events(events));

    let report = proxy.install().await?;
    if !report.failed.is_empty() {
        warn!(failed = ?report.failed, "Some precache entries are missing");
    }
    info!(
        version = %report.version,
        cached = report.cached.len(),
        origin = %proxy.origin(),
        "Proxy installed"
    );

    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;
    info!(addr = %listener.local_addr()?, "Listening");

    axum::serve(listener, router(AppState::new(proxy, upstream))).await?;
    Ok(())
}
