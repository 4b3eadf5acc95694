//! Chip lifecycle manager.
//!
//! Opens transport sessions, runs one event pump per session, and keeps the
//! persisted chip status in step with the [`SessionRegistry`]:
//!
//! - CONNECTED: register the handle, persist connected=true / ACTIVE, notify
//!   the listener.
//! - DISCONNECTED / LOST: unregister (epoch-guarded), persist
//!   connected=false / DISCONNECTED, notify the listener so timers halt.
//! - explicit disconnect: logout, unregister, halt timers, persist
//!   connected=false / PENDING.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use chipwarm_core::events::DomainEvent;
use chipwarm_core::types::{Chip, ChipStatus, ConnectionState, StatusSource, Timestamp};
use chipwarm_storage::{ChipRepository, Database};

use crate::error::{SessionError, TransportError};
use crate::gateway::{PairingArtifact, StateChange, TransportGateway, TransportSession};
use crate::registry::{SessionHandle, SessionRegistry};
use crate::response_slot::ResponseSlot;

/// Receives connection changes for chips. Implemented by the simulation
/// scheduler so this crate does not depend on it.
pub trait ChipEventListener: Send + Sync {
    fn on_chip_connected(&self, chip_id: Uuid);
    fn on_chip_disconnected(&self, chip_id: Uuid);
}

/// What `connect` hands back to the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Show this to the user to complete pairing.
    PairingArtifact(String),
    Connected,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusReport {
    pub chip_id: Uuid,
    pub state: ConnectionState,
    pub source: StatusSource,
}

type ConnectResult = Result<ConnectOutcome, SessionError>;

struct LiveSession {
    handle: SessionHandle,
    cancel: CancellationToken,
}

enum PumpExit {
    Cancelled,
    HandshakeExpired,
    Ended(&'static str),
}

pub struct ChipLifecycleManager {
    gateway: Arc<dyn TransportGateway>,
    registry: Arc<SessionRegistry>,
    chips: ChipRepository,
    listener: Option<Arc<dyn ChipEventListener>>,
    events: Option<broadcast::Sender<DomainEvent>>,
    connect_timeout: Duration,
    pairing_timeout: Duration,
    /// Sessions with a running event pump, pairing or connected.
    pumps: Mutex<HashMap<Uuid, LiveSession>>,
    /// Chip -> epoch of the session still awaiting its handshake.
    pairing: Mutex<HashMap<Uuid, Uuid>>,
    shutdown: CancellationToken,
}

impl ChipLifecycleManager {
    pub fn new(
        gateway: Arc<dyn TransportGateway>,
        registry: Arc<SessionRegistry>,
        db: Arc<Database>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            registry,
            chips: ChipRepository::new(db),
            listener: None,
            events: None,
            connect_timeout,
            pairing_timeout: connect_timeout,
            pumps: Mutex::new(HashMap::new()),
            pairing: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn ChipEventListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_events(mut self, events: broadcast::Sender<DomainEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// How long the user has to scan a pairing artifact once it is issued.
    /// Defaults to the connect timeout.
    pub fn with_pairing_timeout(mut self, pairing_timeout: Duration) -> Self {
        self.pairing_timeout = pairing_timeout;
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Open a session for the chip and wait for the first pairing artifact
    /// or CONNECTED, whichever comes first.
    ///
    /// Nothing is returned for the handshake after an artifact has been
    /// handed out. If the session is not CONNECTED within the pairing
    /// timeout, counted from that artifact, it is closed and a
    /// `PairingExpired` event is broadcast.
    pub async fn connect(self: &Arc<Self>, chip_id: Uuid, caller: Uuid) -> ConnectResult {
        self.owned_chip(chip_id, caller)?;

        let epoch = Uuid::new_v4();
        {
            // A pump registers its session before clearing its pairing
            // entry, so both checks must happen under this lock.
            let mut pairing = lock(&self.pairing);
            if self.registry.contains(chip_id) {
                return Err(SessionError::AlreadyConnected(chip_id));
            }
            if pairing.contains_key(&chip_id) {
                return Err(SessionError::PairingInProgress(chip_id));
            }
            pairing.insert(chip_id, epoch);
        }

        let opened = match self.gateway.open(chip_id).await {
            Ok(opened) => opened,
            Err(e) => {
                self.release(chip_id, epoch);
                error!(chip_id = %chip_id, error = %e, "failed to open transport session");
                return Err(e.into());
            }
        };

        let handle = SessionHandle {
            epoch,
            session: opened.session,
        };
        let cancel = self.shutdown.child_token();
        lock(&self.pumps).insert(
            chip_id,
            LiveSession {
                handle: handle.clone(),
                cancel: cancel.clone(),
            },
        );

        let (slot, response) = ResponseSlot::channel();
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager
                .run_pump(chip_id, handle, opened.pairing, opened.state_changes, slot, cancel)
                .await;
        });

        info!(chip_id = %chip_id, "transport session opened, awaiting handshake");
        response
            .await
            .unwrap_or(Err(SessionError::Transport(TransportError::Closed)))
    }

    /// As [`connect`](Self::connect), but a live session counts as success.
    pub async fn ensure_connected(self: &Arc<Self>, chip_id: Uuid, caller: Uuid) -> ConnectResult {
        match self.connect(chip_id, caller).await {
            Err(SessionError::AlreadyConnected(_)) => Ok(ConnectOutcome::Connected),
            other => other,
        }
    }

    /// Log the chip out and clear its live state. Succeeds when nothing is live.
    ///
    /// Local state is cleaned up even when logout fails; the failure is
    /// reported afterwards.
    pub async fn disconnect(&self, chip_id: Uuid, caller: Uuid) -> Result<(), SessionError> {
        self.owned_chip(chip_id, caller)?;

        let session = self.take_live(chip_id);
        let logout = match &session {
            Some(handle) => handle.session.logout().await,
            None => Ok(()),
        };

        if let Some(listener) = &self.listener {
            listener.on_chip_disconnected(chip_id);
        }
        self.chips
            .update_connection(chip_id, false, ChipStatus::Pending)?;

        if session.is_some() {
            self.emit(DomainEvent::ChipDisconnected {
                chip_id,
                reason: "logout".to_string(),
                timestamp: Timestamp::now(),
            });
            info!(chip_id = %chip_id, "chip disconnected by owner");
        }

        logout.map_err(|e| {
            error!(chip_id = %chip_id, error = %e, "logout failed");
            SessionError::Transport(e)
        })
    }

    /// Tear down any live session without ownership checks or status
    /// persistence. Used before a chip is deleted.
    pub async fn force_close(&self, chip_id: Uuid) {
        let Some(handle) = self.take_live(chip_id) else {
            return;
        };
        if let Some(listener) = &self.listener {
            listener.on_chip_disconnected(chip_id);
        }
        if let Err(e) = handle.session.logout().await {
            warn!(chip_id = %chip_id, error = %e, "logout failed during force close");
            if let Err(e) = handle.session.close().await {
                warn!(chip_id = %chip_id, error = %e, "close failed during force close");
            }
        }
        info!(chip_id = %chip_id, "live session force-closed");
    }

    /// Connection status. A registered session is asked directly; if that
    /// check fails the last-persisted flag answers.
    pub async fn status(&self, chip_id: Uuid, caller: Uuid) -> Result<StatusReport, SessionError> {
        let chip = self.owned_chip(chip_id, caller)?;

        let Some(handle) = self.registry.lookup(chip_id) else {
            return Ok(StatusReport {
                chip_id,
                state: ConnectionState::Disconnected,
                source: StatusSource::Registry,
            });
        };

        let report = match handle.session.is_logged_in().await {
            Ok(logged_in) => StatusReport {
                chip_id,
                state: ConnectionState::from_flag(logged_in),
                source: StatusSource::Live,
            },
            Err(e) => {
                warn!(chip_id = %chip_id, error = %e, "live status check failed, using persisted flag");
                StatusReport {
                    chip_id,
                    state: ConnectionState::from_flag(chip.connected),
                    source: StatusSource::Persisted,
                }
            }
        };
        Ok(report)
    }

    /// Number of chips with a registered live session.
    pub fn live_sessions(&self) -> usize {
        self.registry.len()
    }

    /// Stop every event pump and release registered sessions without
    /// logging them out. Persisted state is left alone.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        lock(&self.pumps).clear();
        lock(&self.pairing).clear();
        for chip_id in self.registry.chip_ids() {
            if let Some(handle) = self.registry.unregister(chip_id) {
                if let Err(e) = handle.session.close().await {
                    warn!(chip_id = %chip_id, error = %e, "failed to close session at shutdown");
                }
            }
        }
        info!("chip lifecycle manager shut down");
    }

    fn owned_chip(&self, chip_id: Uuid, caller: Uuid) -> Result<Chip, SessionError> {
        let chip = self
            .chips
            .find_by_id(chip_id)?
            .ok_or(SessionError::NotFound(chip_id))?;
        if chip.owner_id != caller {
            return Err(SessionError::Forbidden(chip_id));
        }
        Ok(chip)
    }

    /// Stop the chip's pump and pull its session out of every table.
    fn take_live(&self, chip_id: Uuid) -> Option<SessionHandle> {
        let live = lock(&self.pumps).remove(&chip_id);
        if let Some(live) = &live {
            live.cancel.cancel();
        }
        lock(&self.pairing).remove(&chip_id);
        self.registry
            .unregister(chip_id)
            .or_else(|| live.map(|l| l.handle))
    }

    /// Drop pump and pairing entries that still belong to `epoch`.
    fn release(&self, chip_id: Uuid, epoch: Uuid) {
        {
            let mut pumps = lock(&self.pumps);
            if pumps.get(&chip_id).is_some_and(|l| l.handle.epoch == epoch) {
                pumps.remove(&chip_id);
            }
        }
        let mut pairing = lock(&self.pairing);
        if pairing.get(&chip_id) == Some(&epoch) {
            pairing.remove(&chip_id);
        }
    }

    async fn run_pump(
        self: Arc<Self>,
        chip_id: Uuid,
        handle: SessionHandle,
        mut pairing_rx: mpsc::UnboundedReceiver<PairingArtifact>,
        mut state_rx: mpsc::UnboundedReceiver<StateChange>,
        slot: ResponseSlot<ConnectResult>,
        cancel: CancellationToken,
    ) {
        let deadline = tokio::time::sleep(self.connect_timeout);
        tokio::pin!(deadline);
        let mut connected = false;
        let mut pairing_open = true;
        let mut artifact_issued = false;

        let exit = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break PumpExit::Cancelled,
                _ = &mut deadline, if !connected => break PumpExit::HandshakeExpired,
                artifact = pairing_rx.recv(), if pairing_open && !connected => match artifact {
                    Some(PairingArtifact(payload)) => {
                        debug!(chip_id = %chip_id, "pairing artifact issued");
                        self.emit(DomainEvent::PairingArtifactIssued {
                            chip_id,
                            artifact: payload.clone(),
                            timestamp: Timestamp::now(),
                        });
                        slot.fill(Ok(ConnectOutcome::PairingArtifact(payload)));
                        if !artifact_issued {
                            artifact_issued = true;
                            deadline
                                .as_mut()
                                .reset(tokio::time::Instant::now() + self.pairing_timeout);
                        }
                    }
                    None => pairing_open = false,
                },
                change = state_rx.recv() => match change {
                    Some(StateChange::Connected) => {
                        if !connected {
                            connected = true;
                            self.on_connected(chip_id, &handle);
                            slot.fill(Ok(ConnectOutcome::Connected));
                        }
                    }
                    Some(StateChange::Disconnected) => break PumpExit::Ended("disconnected"),
                    Some(StateChange::Lost) => break PumpExit::Ended("lost"),
                    Some(StateChange::Other(state)) => {
                        debug!(chip_id = %chip_id, state = %state, "transport state changed");
                    }
                    None => break PumpExit::Ended("event stream closed"),
                },
            }
        };

        let response = match exit {
            PumpExit::Cancelled => None,
            PumpExit::HandshakeExpired => {
                warn!(
                    chip_id = %chip_id,
                    artifact_issued,
                    "handshake not completed in time, closing session"
                );
                if let Err(e) = handle.session.close().await {
                    warn!(chip_id = %chip_id, error = %e, "failed to close half-open session");
                }
                if artifact_issued {
                    self.emit(DomainEvent::PairingExpired {
                        chip_id,
                        timestamp: Timestamp::now(),
                    });
                }
                Some(Err(SessionError::Timeout(self.connect_timeout.as_secs())))
            }
            PumpExit::Ended(reason) => {
                self.on_session_ended(chip_id, handle.epoch, reason);
                Some(Err(SessionError::Transport(TransportError::Closed)))
            }
        };
        // Release before answering so a retry is not refused as still pairing.
        self.release(chip_id, handle.epoch);
        if let Some(response) = response {
            slot.fill(response);
        }
    }

    fn on_connected(&self, chip_id: Uuid, handle: &SessionHandle) {
        if let Some(prior) = self.registry.register(chip_id, handle.clone()) {
            if prior.epoch != handle.epoch {
                warn!(chip_id = %chip_id, "replaced a previously registered session");
            }
        }
        {
            let mut pairing = lock(&self.pairing);
            if pairing.get(&chip_id) == Some(&handle.epoch) {
                pairing.remove(&chip_id);
            }
        }
        if let Err(e) = self
            .chips
            .update_connection(chip_id, true, ChipStatus::Active)
        {
            error!(chip_id = %chip_id, error = %e, "failed to persist connected state");
        }
        if let Some(listener) = &self.listener {
            listener.on_chip_connected(chip_id);
        }
        self.emit(DomainEvent::ChipConnected {
            chip_id,
            timestamp: Timestamp::now(),
        });
        info!(chip_id = %chip_id, "chip connected");
    }

    fn on_session_ended(&self, chip_id: Uuid, epoch: Uuid, reason: &str) {
        if self.registry.unregister_if(chip_id, epoch).is_none() {
            debug!(chip_id = %chip_id, reason, "ended session was not the registered one");
            return;
        }
        if let Err(e) = self
            .chips
            .update_connection(chip_id, false, ChipStatus::Disconnected)
        {
            error!(chip_id = %chip_id, error = %e, "failed to persist disconnected state");
        }
        if let Some(listener) = &self.listener {
            listener.on_chip_disconnected(chip_id);
        }
        self.emit(DomainEvent::ChipDisconnected {
            chip_id,
            reason: reason.to_string(),
            timestamp: Timestamp::now(),
        });
        warn!(chip_id = %chip_id, reason, "chip session ended");
    }

    fn emit(&self, event: DomainEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
