//! Lumasheet daemon: capture configured streams, write contact sheets on exit

use std::path::PathBuf;

use color_eyre::{eyre::eyre, Result};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use lumasheet::{Config, StreamSupervisor, SupervisorError};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and configuration
    color_eyre::install()?;
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Lumasheet launching...");
    if let Some(path) = &config_path {
        info!("Loaded configuration from {}", path.display());
    }

    let supervisor = StreamSupervisor::new(
        config.stream_source(),
        config.image_sink(),
        config.supervisor.clone(),
    );

    let mut started = 0usize;
    for stream in &config.streams {
        let interval = stream
            .interval_secs
            .unwrap_or(config.capture.default_interval_secs);
        let result = match &stream.id {
            Some(id) => {
                supervisor
                    .start_with_id(id.clone(), &stream.address, interval)
                    .await
            }
            None => supervisor.start(&stream.address, interval).await,
        };
        match result {
            Ok(id) => {
                info!("Started stream '{}' with interval = {}s", id, interval);
                started += 1;
            }
            Err(e) => error!("Failed to start {}: {}", stream.address, e),
        }
    }

    if started == 0 {
        return Err(eyre!("no streams could be started"));
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, finalizing {} stream(s)", started);

    for (id, result) in supervisor.shutdown().await {
        match result {
            Ok(path) => info!("Image saved for '{}' at {}", id, path.display()),
            Err(SupervisorError::InsufficientFrames { have, need, .. }) => {
                warn!("Not enough frames captured for '{}' ({}/{})", id, have, need)
            }
            Err(e) => error!("Stream '{}' did not finalize: {}", id, e),
        }
    }

    for status in supervisor.list() {
        if let Some(outcome) = &status.outcome {
            info!("Stream '{}' ended earlier: {:?}", status.id, outcome);
        }
    }

    info!("Lumasheet shutting down");
    Ok(())
}
