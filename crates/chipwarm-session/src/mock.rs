//! In-process transport used by tests and by the `loopback` transport mode.
//!
//! A `MockGateway` hands out `MockSession`s that pair after a configurable
//! delay, accept every send (unless told to fail) and record what was sent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::error::TransportError;
use crate::gateway::{OpenedSession, PairingArtifact, StateChange, TransportGateway, TransportSession};

#[derive(Clone, Debug)]
struct MockBehavior {
    emit_pairing: bool,
    /// `None` never reports CONNECTED on its own.
    connect_after: Option<Duration>,
    fail_open: bool,
    fail_send: bool,
    fail_identity: bool,
    fail_logout: bool,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            emit_pairing: true,
            connect_after: Some(Duration::ZERO),
            fail_open: false,
            fail_send: false,
            fail_identity: false,
            fail_logout: false,
        }
    }
}

pub struct MockGateway {
    behavior: MockBehavior,
    opened: AtomicUsize,
    sessions: Mutex<HashMap<Uuid, Arc<MockSession>>>,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    /// Emits one pairing artifact, then CONNECTED straight away.
    pub fn new() -> Self {
        Self {
            behavior: MockBehavior::default(),
            opened: AtomicUsize::new(0),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Skip the pairing artifact and report CONNECTED on open.
    pub fn connect_immediately(mut self) -> Self {
        self.behavior.emit_pairing = false;
        self.behavior.connect_after = Some(Duration::ZERO);
        self
    }

    /// Emit the pairing artifact, then CONNECTED after `delay`.
    pub fn with_pairing_delay(mut self, delay: Duration) -> Self {
        self.behavior.emit_pairing = true;
        self.behavior.connect_after = Some(delay);
        self
    }

    /// Emit the pairing artifact and never connect.
    pub fn never_connect(mut self) -> Self {
        self.behavior.connect_after = None;
        self
    }

    /// Emit nothing at all after open.
    pub fn silent(mut self) -> Self {
        self.behavior.emit_pairing = false;
        self.behavior.connect_after = None;
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.behavior.fail_open = true;
        self
    }

    pub fn failing_sends(mut self) -> Self {
        self.behavior.fail_send = true;
        self
    }

    pub fn failing_identity(mut self) -> Self {
        self.behavior.fail_identity = true;
        self
    }

    pub fn failing_logout(mut self) -> Self {
        self.behavior.fail_logout = true;
        self
    }

    /// Number of sessions opened so far.
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// The most recent session opened for a chip.
    pub fn session(&self, chip_id: Uuid) -> Option<Arc<MockSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&chip_id)
            .cloned()
    }
}

#[async_trait]
impl TransportGateway for MockGateway {
    async fn open(&self, chip_id: Uuid) -> Result<OpenedSession, TransportError> {
        if self.behavior.fail_open {
            return Err(TransportError::OpenFailed("mock gateway refused".to_string()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);

        let (pairing_tx, pairing_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = mpsc::unbounded_channel();

        let session = Arc::new(MockSession {
            own_address: format!("{}@mock", chip_id.simple()),
            state_tx: Some(state_tx),
            logged_in: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            fail_send: AtomicBool::new(self.behavior.fail_send),
            fail_identity: AtomicBool::new(self.behavior.fail_identity),
            fail_logout: AtomicBool::new(self.behavior.fail_logout),
            identity_delay_ms: AtomicU64::new(0),
            sent: Mutex::new(Vec::new()),
        });

        if self.behavior.emit_pairing {
            let _ = pairing_tx.send(PairingArtifact(format!("mock-qr:{}", chip_id)));
        }

        match self.behavior.connect_after {
            Some(delay) if delay.is_zero() => session.mark_connected(),
            Some(delay) => {
                let pending = Arc::clone(&session);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if !pending.is_closed() {
                        pending.mark_connected();
                    }
                });
            }
            None => {}
        }

        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(chip_id, Arc::clone(&session));
        debug!(chip_id = %chip_id, "mock session opened");

        Ok(OpenedSession {
            session,
            pairing: pairing_rx,
            state_changes: state_rx,
        })
    }
}

pub struct MockSession {
    own_address: String,
    state_tx: Option<mpsc::UnboundedSender<StateChange>>,
    logged_in: AtomicBool,
    closed: AtomicBool,
    fail_send: AtomicBool,
    fail_identity: AtomicBool,
    fail_logout: AtomicBool,
    identity_delay_ms: AtomicU64,
    sent: Mutex<Vec<(String, String)>>,
}

impl MockSession {
    /// A logged-in session with no event channel, for registering directly.
    pub fn detached(own_address: &str) -> Self {
        Self {
            own_address: own_address.to_string(),
            state_tx: None,
            logged_in: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            fail_send: AtomicBool::new(false),
            fail_identity: AtomicBool::new(false),
            fail_logout: AtomicBool::new(false),
            identity_delay_ms: AtomicU64::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn mark_connected(&self) {
        self.logged_in.store(true, Ordering::SeqCst);
        self.emit(StateChange::Connected);
    }

    /// Push a state change to whoever consumes this session's events.
    pub fn emit(&self, change: StateChange) -> bool {
        match &self.state_tx {
            Some(tx) => tx.send(change).is_ok(),
            None => false,
        }
    }

    pub fn set_fail_send(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_identity(&self, fail: bool) {
        self.fail_identity.store(fail, Ordering::SeqCst);
    }

    /// Make `own_address` sleep before answering.
    pub fn set_identity_delay(&self, delay: Duration) {
        self.identity_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_logged_in(&self, logged_in: bool) {
        self.logged_in.store(logged_in, Ordering::SeqCst);
    }

    /// `(to, content)` pairs accepted so far.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportSession for MockSession {
    async fn send_text(&self, to: &str, content: &str) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed(format!("mock refused send to {to}")));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((to.to_string(), content.to_string()));
        Ok(())
    }

    async fn is_logged_in(&self) -> Result<bool, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        Ok(self.logged_in.load(Ordering::SeqCst))
    }

    async fn logout(&self) -> Result<(), TransportError> {
        if self.fail_logout.load(Ordering::SeqCst) {
            return Err(TransportError::LogoutFailed("mock logout refused".to_string()));
        }
        self.logged_in.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        self.emit(StateChange::Disconnected);
        Ok(())
    }

    async fn own_address(&self) -> Result<String, TransportError> {
        let delay_ms = self.identity_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        if self.fail_identity.load(Ordering::SeqCst) {
            return Err(TransportError::IdentityUnavailable(
                "mock identity lookup failed".to_string(),
            ));
        }
        Ok(self.own_address.clone())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_emits_pairing_then_connected() {
        let gateway = MockGateway::new();
        let chip = Uuid::new_v4();
        let mut opened = gateway.open(chip).await.unwrap();

        let artifact = opened.pairing.recv().await.unwrap();
        assert!(artifact.0.contains(&chip.to_string()));
        assert_eq!(opened.state_changes.recv().await, Some(StateChange::Connected));
        assert!(opened.session.is_logged_in().await.unwrap());
        assert_eq!(gateway.open_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_immediately_skips_pairing() {
        let gateway = MockGateway::new().connect_immediately();
        let mut opened = gateway.open(Uuid::new_v4()).await.unwrap();
        assert!(opened.pairing.try_recv().is_err());
        assert_eq!(opened.state_changes.recv().await, Some(StateChange::Connected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pairing_delay() {
        let gateway = MockGateway::new().with_pairing_delay(Duration::from_secs(5));
        let mut opened = gateway.open(Uuid::new_v4()).await.unwrap();

        assert!(opened.pairing.recv().await.is_some());
        assert!(!opened.session.is_logged_in().await.unwrap());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(opened.state_changes.recv().await, Some(StateChange::Connected));
        assert!(opened.session.is_logged_in().await.unwrap());
    }

    #[tokio::test]
    async fn test_failing_open() {
        let gateway = MockGateway::new().failing_open();
        assert!(matches!(
            gateway.open(Uuid::new_v4()).await,
            Err(TransportError::OpenFailed(_))
        ));
        assert_eq!(gateway.open_count(), 0);
    }

    #[tokio::test]
    async fn test_send_records_and_fails_on_demand() {
        let session = MockSession::detached("bot@c.us");
        session.send_text("a@c.us", "Olá!").await.unwrap();
        session.set_fail_send(true);
        assert!(session.send_text("a@c.us", "Sim").await.is_err());
        assert_eq!(session.sent(), vec![("a@c.us".to_string(), "Olá!".to_string())]);
    }

    #[tokio::test]
    async fn test_logout_emits_disconnected() {
        let gateway = MockGateway::new().connect_immediately();
        let chip = Uuid::new_v4();
        let mut opened = gateway.open(chip).await.unwrap();
        assert_eq!(opened.state_changes.recv().await, Some(StateChange::Connected));

        opened.session.logout().await.unwrap();
        assert_eq!(opened.state_changes.recv().await, Some(StateChange::Disconnected));
        assert!(gateway.session(chip).unwrap().is_closed());
    }

    #[tokio::test]
    async fn test_failing_identity() {
        let session = MockSession::detached("bot@c.us");
        assert_eq!(session.own_address().await.unwrap(), "bot@c.us");
        session.set_fail_identity(true);
        assert!(matches!(
            session.own_address().await,
            Err(TransportError::IdentityUnavailable(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_delay() {
        let session = MockSession::detached("bot@c.us");
        session.set_identity_delay(Duration::from_millis(200));

        let started = tokio::time::Instant::now();
        assert_eq!(session.own_address().await.unwrap(), "bot@c.us");
        assert!(started.elapsed() >= Duration::from_millis(200));
    }
}
