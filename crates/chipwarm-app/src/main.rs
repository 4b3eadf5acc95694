//! chipwarm application binary - composition root.
//!
//! 1. Parse CLI flags and load configuration from TOML
//! 2. Initialize tracing
//! 3. Open SQLite and clear stale connected flags
//! 4. Build the transport gateway, scheduler and lifecycle manager
//! 5. Serve the REST API until Ctrl-C, then stop timers and sessions

mod cli;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use chipwarm_api::state::AppState;
use chipwarm_core::config::{ChipwarmConfig, TransportKind};
use chipwarm_core::events::DomainEvent;
use chipwarm_core::types::Timestamp;
use chipwarm_session::{MockGateway, TransportGateway};
use chipwarm_storage::{ChipRepository, Database};

use crate::cli::{expand_home, CliArgs};

fn build_gateway(config: &ChipwarmConfig) -> Arc<dyn TransportGateway> {
    match config.session.transport {
        TransportKind::Loopback => {
            let delay = Duration::from_millis(config.session.loopback_pairing_delay_ms);
            tracing::info!(pairing_delay_ms = delay.as_millis() as u64, "Using loopback transport");
            Arc::new(MockGateway::new().with_pairing_delay(delay))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = ChipwarmConfig::load_or_default(&config_file);
    if let Some(data_dir) = args.resolve_data_dir() {
        config.general.data_dir = data_dir;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }
    config.general.port = args.resolve_port(config.general.port);

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting chipwarm v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration resolved");
    config.validate()?;

    // Storage.
    let home = std::env::var("HOME").ok();
    let data_dir = expand_home(&config.general.data_dir, home.as_deref());
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }

    let db_path = data_dir.join("chipwarm.db");
    let db = Arc::new(Database::new(&db_path)?);
    tracing::info!(path = %db_path.display(), "SQLite database opened");

    // No session survives a restart.
    let stale = ChipRepository::new(Arc::clone(&db)).reset_connected_flags()?;
    if stale > 0 {
        tracing::info!(count = stale, "Cleared stale connected flags");
    }

    // Orchestration core.
    let gateway = build_gateway(&config);
    let port = config.general.port;
    let state = AppState::new(config, db, gateway)?;
    let _ = state.event_tx.send(DomainEvent::ApplicationStarted {
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Timestamp::now(),
    });

    // API server.
    let served = chipwarm_api::start_server(port, state.clone(), shutdown_signal()).await;
    if let Err(e) = &served {
        tracing::error!(port, error = %e, "API server failed");
        tracing::error!("Try: CHIPWARM_PORT={} cargo run -p chipwarm-app", port.saturating_add(1));
    }

    state.shutdown().await;
    tracing::info!("chipwarm stopped");

    served.map_err(Into::into)
}
