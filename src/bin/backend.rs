use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tiktok_downloader::{
    config::{DEFAULT_CONFIG_PATH, Settings, load_settings_from},
    downloader::DownloadManager,
    extractor::YtDlp,
    server::{AppState, router},
};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "HTTP API for fetching TikTok videos through yt-dlp.")]
struct Cli {
    #[arg(long = "config", value_name = "PATH", default_value = DEFAULT_CONFIG_PATH, help = "Path to the env-style config file")]
    config: PathBuf,
    #[arg(
        long = "downloads-dir",
        value_name = "PATH",
        help = "Directory downloaded videos are written to"
    )]
    downloads_dir: Option<PathBuf>,
    #[arg(long = "host", value_name = "ADDR", help = "Address to bind")]
    host: Option<String>,
    #[arg(long = "port", value_name = "PORT", help = "Port to bind")]
    port: Option<u16>,
    #[arg(long = "ytdlp", value_name = "PATH", help = "yt-dlp executable to run")]
    ytdlp: Option<PathBuf>,
    #[arg(
        long = "delete-after-serve",
        help = "Remove each file once it has been served"
    )]
    delete_after_serve: bool,
}

impl Cli {
    fn apply(self, mut settings: Settings) -> Settings {
        if let Some(dir) = self.downloads_dir {
            settings.downloads_dir = dir;
        }
        if let Some(host) = self.host {
            settings.host = host;
        }
        if let Some(port) = self.port {
            settings.port = port;
        }
        if let Some(ytdlp) = self.ytdlp {
            settings.ytdlp_path = ytdlp;
        }
        settings.delete_after_serve |= self.delete_after_serve;
        settings
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let base = load_settings_from(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    let settings = cli.apply(base);

    let ytdlp = YtDlp::new(&settings.ytdlp_path);
    if let Err(err) = ytdlp.ensure_available() {
        warn!(error = %err, "yt-dlp is not usable; info and download requests will fail");
    }

    let manager = DownloadManager::new(&settings.downloads_dir, Arc::new(ytdlp))
        .with_context(|| format!("preparing {}", settings.downloads_dir.display()))?;
    info!(dir = %manager.downloads_dir().display(), "serving downloads");

    let state = AppState::new(Arc::new(manager)).with_delete_after_serve(settings.delete_after_serve);

    let addr = SocketAddr::new(
        settings
            .host
            .parse()
            .with_context(|| format!("parsing host {}", settings.host))?,
        settings.port,
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!("API server listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(error = %err, "failed to install Ctrl+C handler");
    }
}
