use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use tablo_client::{DeviceApi, TabloDevice};
use tablo_live::{LiveConfig, Registry};
use tokio_util::sync::CancellationToken;

mod api;
mod handler;

#[derive(Parser, Debug)]
#[command(name = "tablo-live", about = "Serve Tablo channels as local HLS streams")]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "TABLO_LIVE_CONFIG", default_value = "tablo-live.toml")]
    config: PathBuf,
}

fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .filter_module("tablo_live", log::LevelFilter::Debug)
        .filter_module("tablo_client", log::LevelFilter::Debug)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();
    let config = LiveConfig::load_or_default(&args.config)?;

    let device: Arc<dyn DeviceApi> = Arc::new(TabloDevice::new(config.device.options()?)?);
    let registry = Arc::new(Registry::new(config.transcode.clone()));

    let cancel = CancellationToken::new();

    if let Some(max_idle) = config.transcode.idle_eviction() {
        log::info!("Idle supervisors are evicted after {:?}", max_idle);
        registry.spawn_eviction(max_idle, cancel.clone());
    }

    let state = handler::AppState {
        registry: Arc::clone(&registry),
        device,
    };
    let server = api::start_api_server(config.server.listen.clone(), state, cancel.clone());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            _ = tokio::signal::ctrl_c() => {
                log::info!("Ctrl-C received, shutting down");
                cancel.cancel();
            },
        }
    }

    registry.shutdown().await;
    if let Err(e) = server.await {
        log::error!("API server task failed: {}", e);
    }
    Ok(())
}
