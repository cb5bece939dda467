use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod persons;

use config::Config;
use dbus_interface::{FacegateService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "facegated starting");

    let config = Config::from_env();
    let system_bus = config.system_bus;

    // Model loading and the initial gallery build are blocking.
    let engine = tokio::task::spawn_blocking(move || engine::spawn_engine(&config))
        .await
        .context("engine startup task panicked")?
        .context("failed to start engine")?;

    let builder = if system_bus {
        zbus::connection::Builder::system()?
    } else {
        zbus::connection::Builder::session()?
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, FacegateService::new(engine))?
        .build()
        .await
        .with_context(|| format!("failed to claim {BUS_NAME}"))?;

    tracing::info!(bus = if system_bus { "system" } else { "session" }, name = BUS_NAME, "facegated ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facegated shutting down");

    Ok(())
}
