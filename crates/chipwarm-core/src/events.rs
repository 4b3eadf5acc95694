use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{SimulationStatus, Timestamp};

/// Domain events broadcast to the SSE stream and logged.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum DomainEvent {
    // =========================================================================
    // Session Events
    // =========================================================================
    /// The transport issued a pairing artifact (QR payload) for a chip.
    PairingArtifactIssued {
        chip_id: Uuid,
        artifact: String,
        timestamp: Timestamp,
    },

    /// A pairing artifact went unscanned and its session was closed.
    PairingExpired { chip_id: Uuid, timestamp: Timestamp },

    /// A chip's session reached CONNECTED.
    ChipConnected { chip_id: Uuid, timestamp: Timestamp },

    /// A chip's session was lost or logged out.
    ChipDisconnected {
        chip_id: Uuid,
        reason: String,
        timestamp: Timestamp,
    },

    // =========================================================================
    // Simulation Events
    // =========================================================================
    SimulationStarted {
        simulation_id: Uuid,
        chip_id: Uuid,
        timestamp: Timestamp,
    },

    /// A simulation moved between RUNNING, PAUSED and COMPLETED.
    SimulationStatusChanged {
        simulation_id: Uuid,
        chip_id: Uuid,
        from: SimulationStatus,
        to: SimulationStatus,
        timestamp: Timestamp,
    },

    /// A timer was removed without a status change (disconnect or identity loss).
    TimerHalted {
        simulation_id: Uuid,
        chip_id: Uuid,
        reason: String,
        timestamp: Timestamp,
    },

    /// A simulated message was appended.
    MessageRecorded {
        simulation_id: Uuid,
        chip_id: Uuid,
        message_id: Uuid,
        timestamp: Timestamp,
    },

    // =========================================================================
    // System Events
    // =========================================================================
    ApplicationStarted {
        version: String,
        timestamp: Timestamp,
    },

    ApplicationShutdown { timestamp: Timestamp },
}

impl DomainEvent {
    /// Returns the timestamp of the event.
    pub fn timestamp(&self) -> Timestamp {
        match self {
            DomainEvent::PairingArtifactIssued { timestamp, .. }
            | DomainEvent::PairingExpired { timestamp, .. }
            | DomainEvent::ChipConnected { timestamp, .. }
            | DomainEvent::ChipDisconnected { timestamp, .. }
            | DomainEvent::SimulationStarted { timestamp, .. }
            | DomainEvent::SimulationStatusChanged { timestamp, .. }
            | DomainEvent::TimerHalted { timestamp, .. }
            | DomainEvent::MessageRecorded { timestamp, .. }
            | DomainEvent::ApplicationStarted { timestamp, .. }
            | DomainEvent::ApplicationShutdown { timestamp } => *timestamp,
        }
    }

    /// Returns the event name used for logging and SSE.
    pub fn event_name(&self) -> &'static str {
        match self {
            DomainEvent::PairingArtifactIssued { .. } => "pairing_artifact_issued",
            DomainEvent::PairingExpired { .. } => "pairing_expired",
            DomainEvent::ChipConnected { .. } => "chip_connected",
            DomainEvent::ChipDisconnected { .. } => "chip_disconnected",
            DomainEvent::SimulationStarted { .. } => "simulation_started",
            DomainEvent::SimulationStatusChanged { .. } => "simulation_status_changed",
            DomainEvent::TimerHalted { .. } => "timer_halted",
            DomainEvent::MessageRecorded { .. } => "message_recorded",
            DomainEvent::ApplicationStarted { .. } => "application_started",
            DomainEvent::ApplicationShutdown { .. } => "application_shutdown",
        }
    }

    /// The chip this event concerns. Only system events have none.
    pub fn chip_id(&self) -> Option<Uuid> {
        match self {
            DomainEvent::PairingArtifactIssued { chip_id, .. }
            | DomainEvent::PairingExpired { chip_id, .. }
            | DomainEvent::ChipConnected { chip_id, .. }
            | DomainEvent::ChipDisconnected { chip_id, .. }
            | DomainEvent::SimulationStarted { chip_id, .. }
            | DomainEvent::SimulationStatusChanged { chip_id, .. }
            | DomainEvent::TimerHalted { chip_id, .. }
            | DomainEvent::MessageRecorded { chip_id, .. } => Some(*chip_id),
            DomainEvent::ApplicationStarted { .. } | DomainEvent::ApplicationShutdown { .. } => {
                None
            }
        }
    }
}
