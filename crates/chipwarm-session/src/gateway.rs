//! Capability traits for the external transport-automation library.
//!
//! The messaging protocol itself lives behind these traits. A gateway opens
//! one session per chip; the session yields pairing artifacts and state
//! changes on two channels and exposes the handful of calls the
//! orchestration core needs.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::TransportError;

/// Opaque pairing payload (e.g. QR contents) shown to the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PairingArtifact(pub String);

/// Connection-state change reported by a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateChange {
    Connected,
    Disconnected,
    Lost,
    /// Intermediate states the core does not act on.
    Other(String),
}

/// A freshly opened transport session and its event channels.
pub struct OpenedSession {
    pub session: Arc<dyn TransportSession>,
    pub pairing: mpsc::UnboundedReceiver<PairingArtifact>,
    pub state_changes: mpsc::UnboundedReceiver<StateChange>,
}

#[async_trait]
pub trait TransportGateway: Send + Sync {
    /// Start a session for a chip. Pairing artifacts and state changes
    /// arrive on the returned channels for the life of the session.
    async fn open(&self, chip_id: Uuid) -> Result<OpenedSession, TransportError>;
}

#[async_trait]
pub trait TransportSession: Send + Sync {
    async fn send_text(&self, to: &str, content: &str) -> Result<(), TransportError>;

    /// Live logged-in check against the network.
    async fn is_logged_in(&self) -> Result<bool, TransportError>;

    /// Log the account out. The session is unusable afterwards.
    async fn logout(&self) -> Result<(), TransportError>;

    /// The address the account sends from.
    async fn own_address(&self) -> Result<String, TransportError>;

    /// Release the session without logging the account out.
    async fn close(&self) -> Result<(), TransportError>;
}
