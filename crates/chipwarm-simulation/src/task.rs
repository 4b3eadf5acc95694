//! The recurring timer behind one running simulation.
//!
//! A task never holds its own session reference: every tick borrows the
//! current handle from the registry, so a disconnect is seen on the next
//! tick without any explicit propagation.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use chipwarm_core::config::SimulationConfig;
use chipwarm_core::error::ChipwarmError;
use chipwarm_core::events::DomainEvent;
use chipwarm_core::types::{Direction, Message, Timestamp};
use chipwarm_session::{SessionRegistry, TransportSession};
use chipwarm_storage::MessageRepository;

use crate::pools::MessagePools;

/// Immutable timing and content settings shared by every timer.
#[derive(Clone, Debug)]
pub struct TimerConfig {
    pub pools: Arc<MessagePools>,
    pub min_interval: Duration,
    pub max_interval: Duration,
    /// Consecutive bot-address failures that end the timer.
    pub identity_failure_limit: u32,
}

impl TimerConfig {
    pub fn from_config(config: &SimulationConfig) -> Result<Self, ChipwarmError> {
        Ok(Self {
            pools: Arc::new(MessagePools::from_config(config)?),
            min_interval: Duration::from_millis(config.min_interval_ms),
            max_interval: Duration::from_millis(config.max_interval_ms),
            identity_failure_limit: config.identity_failure_limit,
        })
    }

    /// Delay before the next tick, uniform over `[min_interval, max_interval]`.
    pub fn next_delay(&self) -> Duration {
        let min = self.min_interval.as_millis() as u64;
        let max = (self.max_interval.as_millis() as u64).max(min);
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// The bot address resolved; `recorded` messages were appended.
    Exchanged { recorded: usize },
    /// No live handle, or the session could not resolve the bot address.
    IdentityFailed,
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskExit {
    Cancelled,
    /// Too many consecutive identity failures.
    IdentityLost,
}

pub struct SimulationTask {
    simulation_id: Uuid,
    chip_id: Uuid,
    bot_address: String,
    config: TimerConfig,
    registry: Arc<SessionRegistry>,
    messages: Arc<MessageRepository>,
    events: Option<broadcast::Sender<DomainEvent>>,
    cancel: CancellationToken,
}

impl SimulationTask {
    pub fn new(
        simulation_id: Uuid,
        chip_id: Uuid,
        bot_address: String,
        config: TimerConfig,
        registry: Arc<SessionRegistry>,
        messages: Arc<MessageRepository>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            simulation_id,
            chip_id,
            bot_address,
            config,
            registry,
            messages,
            events: None,
            cancel,
        }
    }

    pub fn with_events(mut self, events: Option<broadcast::Sender<DomainEvent>>) -> Self {
        self.events = events;
        self
    }

    /// Tick until cancelled or the bot identity is lost.
    pub async fn run(self) -> TaskExit {
        let mut failures = 0u32;
        loop {
            let delay = self.config.next_delay();
            tokio::select! {
                _ = self.cancel.cancelled() => return TaskExit::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.run_tick().await {
                TickOutcome::Cancelled => return TaskExit::Cancelled,
                TickOutcome::IdentityFailed => {
                    failures += 1;
                    if failures >= self.config.identity_failure_limit {
                        warn!(
                            simulation_id = %self.simulation_id,
                            chip_id = %self.chip_id,
                            failures,
                            "bot identity lost, stopping timer"
                        );
                        return TaskExit::IdentityLost;
                    }
                }
                TickOutcome::Exchanged { .. } => failures = 0,
            }
        }
    }

    /// One exchange: OUTBOUND bot -> contact, then INBOUND contact -> bot.
    ///
    /// Send failures are logged and skipped. The cancellation token is
    /// checked before every send and every append.
    pub async fn run_tick(&self) -> TickOutcome {
        if self.cancel.is_cancelled() {
            return TickOutcome::Cancelled;
        }

        let Some(handle) = self.registry.lookup(self.chip_id) else {
            debug!(simulation_id = %self.simulation_id, chip_id = %self.chip_id, "no live session for tick");
            return TickOutcome::IdentityFailed;
        };
        if let Err(e) = handle.session.own_address().await {
            warn!(simulation_id = %self.simulation_id, error = %e, "bot address check failed");
            return TickOutcome::IdentityFailed;
        }

        let exchange = self.config.pools.pick();
        let steps = [
            (
                Direction::Outbound,
                self.bot_address.as_str(),
                exchange.contact.as_str(),
                exchange.outbound.as_str(),
            ),
            (
                Direction::Inbound,
                exchange.contact.as_str(),
                self.bot_address.as_str(),
                exchange.reply.as_str(),
            ),
        ];

        let mut recorded = 0;
        for (direction, sender, recipient, content) in steps {
            if self.cancel.is_cancelled() {
                return TickOutcome::Cancelled;
            }
            if let Err(e) = handle.session.send_text(recipient, content).await {
                warn!(
                    simulation_id = %self.simulation_id,
                    direction = %direction,
                    error = %e,
                    "simulated send failed"
                );
                continue;
            }
            if self.cancel.is_cancelled() {
                return TickOutcome::Cancelled;
            }
            if self.record(direction, sender, recipient, content) {
                recorded += 1;
            }
        }

        TickOutcome::Exchanged { recorded }
    }

    fn record(&self, direction: Direction, sender: &str, recipient: &str, content: &str) -> bool {
        let message = Message::new(
            self.simulation_id,
            self.chip_id,
            direction,
            sender,
            recipient,
            content,
        );
        if let Err(e) = self.messages.append(&message) {
            error!(simulation_id = %self.simulation_id, error = %e, "failed to record message");
            return false;
        }
        if let Some(tx) = &self.events {
            let _ = tx.send(DomainEvent::MessageRecorded {
                simulation_id: self.simulation_id,
                chip_id: self.chip_id,
                message_id: message.id,
                timestamp: Timestamp::now(),
            });
        }
        info!(
            simulation_id = %self.simulation_id,
            direction = %direction,
            "simulated message recorded"
        );
        true
    }
}
