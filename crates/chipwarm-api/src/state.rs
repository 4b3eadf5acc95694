//! Application state shared across all route handlers.
//!
//! AppState is the composition root for the orchestration core: it builds
//! the session registry, the simulation scheduler and the lifecycle manager
//! and wires the scheduler in as the lifecycle manager's listener.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use chipwarm_core::config::ChipwarmConfig;
use chipwarm_core::error::ChipwarmError;
use chipwarm_core::events::DomainEvent;
use chipwarm_session::{ChipLifecycleManager, SessionRegistry, TransportGateway};
use chipwarm_simulation::{SimulationScheduler, TimerConfig};
use chipwarm_core::types::Plan;
use chipwarm_storage::{ChipRepository, Database, PlanRepository, UserRepository};

/// Shared application state.
///
/// All fields use `Arc` for cheap cloning across handler tasks.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<ChipwarmConfig>,
    /// SQLite database for persistent storage.
    pub database: Arc<Database>,
    pub users: Arc<UserRepository>,
    pub chips: Arc<ChipRepository>,
    pub plans: Arc<PlanRepository>,
    pub registry: Arc<SessionRegistry>,
    pub lifecycle: Arc<ChipLifecycleManager>,
    pub scheduler: Arc<SimulationScheduler>,
    /// Broadcast sender for SSE events.
    pub event_tx: broadcast::Sender<DomainEvent>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Build the state around a transport gateway.
    pub fn new(
        config: ChipwarmConfig,
        database: Arc<Database>,
        gateway: Arc<dyn TransportGateway>,
    ) -> Result<Self, ChipwarmError> {
        let (event_tx, _) = broadcast::channel(256);

        let plans = Arc::new(PlanRepository::new(Arc::clone(&database)));
        let seeded = plans.seed_catalog(&Plan::default_catalog())?;
        if seeded > 0 {
            tracing::info!(count = seeded, "Seeded plan catalog");
        }
        let registry = Arc::new(SessionRegistry::new());

        let timer_config = TimerConfig::from_config(&config.simulation)?;
        let scheduler = Arc::new(
            SimulationScheduler::new(Arc::clone(&registry), Arc::clone(&database), timer_config)
                .with_events(event_tx.clone()),
        );
        let lifecycle = Arc::new(
            ChipLifecycleManager::new(
                gateway,
                Arc::clone(&registry),
                Arc::clone(&database),
                Duration::from_secs(config.session.connect_timeout_secs),
            )
            .with_pairing_timeout(Duration::from_secs(config.session.pairing_timeout_secs))
            .with_listener(scheduler.clone())
            .with_events(event_tx.clone()),
        );

        Ok(Self {
            config: Arc::new(config),
            users: Arc::new(UserRepository::new(Arc::clone(&database))),
            chips: Arc::new(ChipRepository::new(Arc::clone(&database))),
            plans,
            database,
            registry,
            lifecycle,
            scheduler,
            event_tx,
            start_time: Instant::now(),
        })
    }

    /// Stop simulation timers, then release live sessions.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.lifecycle.shutdown().await;
        let _ = self.event_tx.send(DomainEvent::ApplicationShutdown {
            timestamp: chipwarm_core::types::Timestamp::now(),
        });
    }
}
