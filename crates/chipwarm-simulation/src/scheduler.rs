//! Simulation scheduler.
//!
//! Owns the timer table: at most one timer slot per simulation id. Start,
//! pause, resume and stop drive both the persisted simulation status and
//! the slot, one at a time per chip; connection changes from the lifecycle
//! manager halt timers without touching persisted status.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use chipwarm_core::events::DomainEvent;
use chipwarm_core::types::{Chip, ChipStatus, Message, Simulation, SimulationStatus, Timestamp};
use chipwarm_session::{ChipEventListener, SessionRegistry, TransportSession};
use chipwarm_storage::{ChipRepository, Database, MessageRepository, SimulationRepository};

use crate::error::SimulationError;
use crate::state_machine::validate_transition;
use crate::task::{SimulationTask, TaskExit, TimerConfig};

struct TimerSlot {
    chip_id: Uuid,
    timer_id: Uuid,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Simulation id -> its single timer slot.
#[derive(Default)]
struct TimerTable {
    slots: Mutex<HashMap<Uuid, TimerSlot>>,
}

impl TimerTable {
    fn slots(&self) -> MutexGuard<'_, HashMap<Uuid, TimerSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a slot built by `make` unless one already exists.
    fn install(&self, simulation_id: Uuid, make: impl FnOnce() -> TimerSlot) -> bool {
        let mut slots = self.slots();
        if slots.contains_key(&simulation_id) {
            return false;
        }
        slots.insert(simulation_id, make());
        true
    }

    fn take(&self, simulation_id: Uuid) -> Option<TimerSlot> {
        self.slots().remove(&simulation_id)
    }

    fn take_chip(&self, chip_id: Uuid) -> Vec<(Uuid, TimerSlot)> {
        let mut slots = self.slots();
        let ids: Vec<Uuid> = slots
            .iter()
            .filter(|(_, slot)| slot.chip_id == chip_id)
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter()
            .filter_map(|id| slots.remove(&id).map(|slot| (id, slot)))
            .collect()
    }

    /// Remove the slot only if it is still the given timer.
    fn remove_if(&self, simulation_id: Uuid, timer_id: Uuid) -> bool {
        let mut slots = self.slots();
        if slots
            .get(&simulation_id)
            .is_some_and(|slot| slot.timer_id == timer_id)
        {
            slots.remove(&simulation_id);
            return true;
        }
        false
    }

    fn contains(&self, simulation_id: Uuid) -> bool {
        self.slots().contains_key(&simulation_id)
    }

    fn len(&self) -> usize {
        self.slots().len()
    }

    fn drain(&self) -> Vec<TimerSlot> {
        self.slots().drain().map(|(_, slot)| slot).collect()
    }
}

/// Chip id -> the lock that serializes start, pause, resume and stop on it.
#[derive(Default)]
struct ChipLocks {
    locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl ChipLocks {
    fn get(&self, chip_id: Uuid) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(chip_id).or_default())
    }
}

pub struct SimulationScheduler {
    registry: Arc<SessionRegistry>,
    chips: ChipRepository,
    simulations: SimulationRepository,
    messages: Arc<MessageRepository>,
    config: TimerConfig,
    timers: Arc<TimerTable>,
    chip_locks: ChipLocks,
    events: Option<broadcast::Sender<DomainEvent>>,
}

impl SimulationScheduler {
    pub fn new(registry: Arc<SessionRegistry>, db: Arc<Database>, config: TimerConfig) -> Self {
        Self {
            registry,
            chips: ChipRepository::new(db.clone()),
            simulations: SimulationRepository::new(db.clone()),
            messages: Arc::new(MessageRepository::new(db)),
            config,
            timers: Arc::new(TimerTable::default()),
            chip_locks: ChipLocks::default(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: broadcast::Sender<DomainEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Start a new simulation on a connected chip.
    ///
    /// The bot identity is resolved before anything is persisted, so a
    /// failed start leaves no record behind.
    pub async fn start(&self, chip_id: Uuid, caller: Uuid) -> Result<Simulation, SimulationError> {
        let chip = self.owned_chip(chip_id, caller)?;
        let lock = self.chip_locks.get(chip.id);
        let _guard = lock.lock().await;

        let handle = self
            .registry
            .lookup(chip.id)
            .ok_or(SimulationError::NotConnected(chip.id))?;
        if self.simulations.find_running_by_chip(chip.id)?.is_some() {
            return Err(SimulationError::SimulationActive(chip.id));
        }

        let bot_address = self.resolve_identity(chip.id, handle.session).await?;

        let simulation = Simulation::start(chip.id);
        if !self.simulations.create_if_idle(&simulation)? {
            return Err(SimulationError::SimulationActive(chip.id));
        }
        self.install_timer(&simulation, bot_address);
        self.chips.update_status(chip.id, ChipStatus::Active)?;

        self.emit(DomainEvent::SimulationStarted {
            simulation_id: simulation.id,
            chip_id: chip.id,
            timestamp: Timestamp::now(),
        });
        info!(simulation_id = %simulation.id, chip_id = %chip.id, "simulation started");
        Ok(simulation)
    }

    /// Pause a running simulation. Pausing a paused simulation is a no-op.
    pub async fn pause(
        &self,
        simulation_id: Uuid,
        caller: Uuid,
    ) -> Result<Simulation, SimulationError> {
        let (_, chip) = self.owned_simulation(simulation_id, caller)?;
        let lock = self.chip_locks.get(chip.id);
        let _guard = lock.lock().await;

        let mut simulation = self.reload(simulation_id)?;
        match simulation.status {
            SimulationStatus::Completed => {
                return Err(SimulationError::AlreadyCompleted(simulation_id))
            }
            SimulationStatus::Paused => return Ok(simulation),
            SimulationStatus::Running => {}
        }
        validate_transition(simulation.status, SimulationStatus::Paused)?;

        if let Some(slot) = self.timers.take(simulation_id) {
            slot.cancel.cancel();
        }
        self.transition(&simulation, SimulationStatus::Paused, None)?;
        self.chips.update_status(chip.id, ChipStatus::Paused)?;

        self.emit_status_change(&simulation, SimulationStatus::Paused);
        simulation.status = SimulationStatus::Paused;
        info!(simulation_id = %simulation_id, "simulation paused");
        Ok(simulation)
    }

    /// Resume a paused simulation, or reinstall the timer of a running one
    /// whose timer was halted by a disconnect.
    pub async fn resume(
        &self,
        simulation_id: Uuid,
        caller: Uuid,
    ) -> Result<Simulation, SimulationError> {
        let (_, chip) = self.owned_simulation(simulation_id, caller)?;
        let lock = self.chip_locks.get(chip.id);
        let _guard = lock.lock().await;

        let mut simulation = self.reload(simulation_id)?;
        if simulation.status.is_terminal() {
            return Err(SimulationError::AlreadyCompleted(simulation_id));
        }
        let handle = self
            .registry
            .lookup(chip.id)
            .ok_or(SimulationError::NotConnected(chip.id))?;

        if simulation.status == SimulationStatus::Paused {
            validate_transition(SimulationStatus::Paused, SimulationStatus::Running)?;
            if let Some(other) = self.simulations.find_running_by_chip(chip.id)? {
                if other.id != simulation_id {
                    return Err(SimulationError::SimulationActive(chip.id));
                }
            }
        }

        let bot_address = self.resolve_identity(chip.id, handle.session).await?;

        if simulation.status == SimulationStatus::Paused {
            self.transition(&simulation, SimulationStatus::Running, None)?;
            self.emit_status_change(&simulation, SimulationStatus::Running);
            simulation.status = SimulationStatus::Running;
        }
        let installed = self.install_timer(&simulation, bot_address);
        self.chips.update_status(chip.id, ChipStatus::Active)?;

        info!(simulation_id = %simulation_id, installed, "simulation resumed");
        Ok(simulation)
    }

    /// Complete a simulation. Any in-flight tick finishes before this returns.
    pub async fn stop(
        &self,
        simulation_id: Uuid,
        caller: Uuid,
    ) -> Result<Simulation, SimulationError> {
        let (_, chip) = self.owned_simulation(simulation_id, caller)?;
        let lock = self.chip_locks.get(chip.id);
        let _guard = lock.lock().await;

        let mut simulation = self.reload(simulation_id)?;
        if simulation.status.is_terminal() {
            return Err(SimulationError::AlreadyCompleted(simulation_id));
        }
        validate_transition(simulation.status, SimulationStatus::Completed)?;

        if let Some(slot) = self.timers.take(simulation_id) {
            slot.cancel.cancel();
            if let Err(e) = slot.handle.await {
                warn!(simulation_id = %simulation_id, error = %e, "timer task ended abnormally");
            }
        }

        let ended_at = Timestamp::now();
        self.transition(&simulation, SimulationStatus::Completed, Some(ended_at))?;

        self.emit_status_change(&simulation, SimulationStatus::Completed);
        simulation.status = SimulationStatus::Completed;
        simulation.ended_at = Some(ended_at);
        info!(simulation_id = %simulation_id, "simulation stopped");
        Ok(simulation)
    }

    pub fn get(&self, simulation_id: Uuid, caller: Uuid) -> Result<Simulation, SimulationError> {
        self.owned_simulation(simulation_id, caller)
            .map(|(simulation, _)| simulation)
    }

    /// Recorded messages, oldest first.
    pub fn messages(
        &self,
        simulation_id: Uuid,
        caller: Uuid,
    ) -> Result<Vec<Message>, SimulationError> {
        self.owned_simulation(simulation_id, caller)?;
        Ok(self.messages.list_by_simulation(simulation_id)?)
    }

    pub fn list_for_chip(&self, chip_id: Uuid) -> Result<Vec<Simulation>, SimulationError> {
        Ok(self.simulations.list_by_chip(chip_id)?)
    }

    /// Cancel every timer on a chip. Persisted status is left as is, so a
    /// running simulation stays RUNNING until resumed or stopped.
    pub fn halt_chip(&self, chip_id: Uuid) -> usize {
        let halted = self.timers.take_chip(chip_id);
        for (simulation_id, slot) in &halted {
            slot.cancel.cancel();
            self.emit(DomainEvent::TimerHalted {
                simulation_id: *simulation_id,
                chip_id,
                reason: "chip disconnected".to_string(),
                timestamp: Timestamp::now(),
            });
            info!(simulation_id = %simulation_id, chip_id = %chip_id, "timer halted");
        }
        halted.len()
    }

    pub fn has_timer(&self, simulation_id: Uuid) -> bool {
        self.timers.contains(simulation_id)
    }

    pub fn active_timers(&self) -> usize {
        self.timers.len()
    }

    /// Cancel all timers and wait for them, leaving persisted status alone.
    pub async fn shutdown(&self) {
        let slots = self.timers.drain();
        let count = slots.len();
        for slot in &slots {
            slot.cancel.cancel();
        }
        for slot in slots {
            let _ = slot.handle.await;
        }
        info!(timers = count, "simulation scheduler shut down");
    }

    fn owned_chip(&self, chip_id: Uuid, caller: Uuid) -> Result<Chip, SimulationError> {
        let chip = self
            .chips
            .find_by_id(chip_id)?
            .ok_or(SimulationError::ChipNotFound(chip_id))?;
        if chip.owner_id != caller {
            return Err(SimulationError::Forbidden(chip_id));
        }
        Ok(chip)
    }

    fn owned_simulation(
        &self,
        simulation_id: Uuid,
        caller: Uuid,
    ) -> Result<(Simulation, Chip), SimulationError> {
        let simulation = self
            .simulations
            .find_by_id(simulation_id)?
            .ok_or(SimulationError::NotFound(simulation_id))?;
        let chip = self.owned_chip(simulation.chip_id, caller)?;
        Ok((simulation, chip))
    }

    /// Spawn a timer for the simulation unless one is already registered.
    fn install_timer(&self, simulation: &Simulation, bot_address: String) -> bool {
        let simulation_id = simulation.id;
        let chip_id = simulation.chip_id;
        let installed = self.timers.install(simulation_id, || {
            let timer_id = Uuid::new_v4();
            let cancel = CancellationToken::new();
            let task = SimulationTask::new(
                simulation_id,
                chip_id,
                bot_address,
                self.config.clone(),
                Arc::clone(&self.registry),
                Arc::clone(&self.messages),
                cancel.clone(),
            )
            .with_events(self.events.clone());

            let timers = Arc::clone(&self.timers);
            let events = self.events.clone();
            let handle = tokio::spawn(async move {
                if task.run().await == TaskExit::IdentityLost
                    && timers.remove_if(simulation_id, timer_id)
                {
                    if let Some(tx) = events {
                        let _ = tx.send(DomainEvent::TimerHalted {
                            simulation_id,
                            chip_id,
                            reason: "bot identity lost".to_string(),
                            timestamp: Timestamp::now(),
                        });
                    }
                }
            });

            TimerSlot {
                chip_id,
                timer_id,
                cancel,
                handle,
            }
        });
        if !installed {
            debug!(simulation_id = %simulation_id, "timer already installed");
        }
        installed
    }

    fn reload(&self, simulation_id: Uuid) -> Result<Simulation, SimulationError> {
        self.simulations
            .find_by_id(simulation_id)?
            .ok_or(SimulationError::NotFound(simulation_id))
    }

    /// Persist `simulation.status -> to`, refusing if the stored row moved on.
    fn transition(
        &self,
        simulation: &Simulation,
        to: SimulationStatus,
        ended_at: Option<Timestamp>,
    ) -> Result<(), SimulationError> {
        if self
            .simulations
            .transition(simulation.id, simulation.status, to, ended_at)?
        {
            return Ok(());
        }
        let current = self.reload(simulation.id)?;
        Err(match current.status {
            SimulationStatus::Completed => SimulationError::AlreadyCompleted(simulation.id),
            _ if to == SimulationStatus::Running => {
                SimulationError::SimulationActive(simulation.chip_id)
            }
            status => SimulationError::InvalidTransition(status, to),
        })
    }

    /// Resolve the bot address, then confirm the session is still live.
    async fn resolve_identity(
        &self,
        chip_id: Uuid,
        session: Arc<dyn TransportSession>,
    ) -> Result<String, SimulationError> {
        let bot_address = session
            .own_address()
            .await
            .map_err(|e| SimulationError::IdentityUnavailable(e.to_string()))?;
        if self.registry.lookup(chip_id).is_none() {
            return Err(SimulationError::NotConnected(chip_id));
        }
        Ok(bot_address)
    }

    fn emit_status_change(&self, simulation: &Simulation, to: SimulationStatus) {
        self.emit(DomainEvent::SimulationStatusChanged {
            simulation_id: simulation.id,
            chip_id: simulation.chip_id,
            from: simulation.status,
            to,
            timestamp: Timestamp::now(),
        });
    }

    fn emit(&self, event: DomainEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

impl ChipEventListener for SimulationScheduler {
    fn on_chip_connected(&self, chip_id: Uuid) {
        debug!(chip_id = %chip_id, "chip connected, halted simulations resume on request");
    }

    fn on_chip_disconnected(&self, chip_id: Uuid) {
        let halted = self.halt_chip(chip_id);
        if halted > 0 {
            warn!(chip_id = %chip_id, halted, "chip disconnected with running timers");
        }
    }
}
