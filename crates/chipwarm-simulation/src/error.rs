//! Error types for the simulation scheduler.

use chipwarm_core::error::ChipwarmError;
use chipwarm_core::types::SimulationStatus;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Simulation not found: {0}")]
    NotFound(Uuid),
    #[error("Chip not found: {0}")]
    ChipNotFound(Uuid),
    #[error("Chip {0} belongs to another user")]
    Forbidden(Uuid),
    #[error("Chip {0} has no live session")]
    NotConnected(Uuid),
    #[error("Chip {0} already has a running simulation")]
    SimulationActive(Uuid),
    #[error("Simulation {0} is already completed")]
    AlreadyCompleted(Uuid),
    #[error("Bot address unavailable: {0}")]
    IdentityUnavailable(String),
    #[error("Invalid state transition: {0} -> {1}")]
    InvalidTransition(SimulationStatus, SimulationStatus),
    #[error("Storage error: {0}")]
    Storage(#[from] ChipwarmError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulation_error_display() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(
            SimulationError::AlreadyCompleted(id).to_string(),
            "Simulation 550e8400-e29b-41d4-a716-446655440000 is already completed"
        );
        assert_eq!(
            SimulationError::InvalidTransition(SimulationStatus::Completed, SimulationStatus::Running)
                .to_string(),
            "Invalid state transition: COMPLETED -> RUNNING"
        );
    }

    #[test]
    fn test_simulation_error_from_chipwarm_error() {
        let err: SimulationError = ChipwarmError::Storage("disk full".to_string()).into();
        assert!(matches!(err, SimulationError::Storage(_)));
        assert!(err.to_string().contains("disk full"));
    }
}
