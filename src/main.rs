use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use flow_manager::config::{Cli, LogFormat, Settings};
use flow_manager::controller::FlowController;
use flow_manager::events::ChannelEventBus;
use flow_manager::store::{FileStorehouse, IntentStore};
use flow_manager::switch::InMemorySwitchRegistry;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let settings = Settings::from(&cli);

    let backend = Box::new(FileStorehouse::new(&cli.persistence_dir));
    let store = IntentStore::connect(backend, settings.box_restore_timer, settings.box_restore_attempts)
        .await
        .context("failed to bootstrap the persistent intent store")?;

    // The controller framework that owns real switches is an external
    // collaborator (§1); this binary runs against an empty in-memory
    // registry so the admin facade and event hooks are reachable standalone.
    // Wiring a real registry is the integration point a deployment adds.
    let switches = Arc::new(InMemorySwitchRegistry::new());
    let (bus, mut flow_mod_rx, mut app_event_rx) = ChannelEventBus::new();

    let controller = Arc::new(FlowController::new(switches, Arc::new(bus), store, settings));

    tokio::spawn(async move {
        while let Some(msg) = flow_mod_rx.recv().await {
            tracing::debug!(destination = %msg.destination, xid = msg.xid, "flow mod ready for the wire dispatcher");
        }
    });
    tokio::spawn(async move {
        while let Some(event) = app_event_rx.recv().await {
            tracing::debug!(?event, "app event published");
        }
    });

    tokio::select! {
        result = flow_manager::api::serve(cli.bind_addr, controller) => {
            result.context("admin API facade exited")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down on ctrl-c");
        }
    }

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    match format {
        LogFormat::Human => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt().json().with_env_filter(filter).init();
        }
    }
}
