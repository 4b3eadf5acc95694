//! Simulation state machine with validated transitions.
//!
//! RUNNING <-> PAUSED, and either of them -> COMPLETED. COMPLETED is terminal.

use chipwarm_core::types::SimulationStatus;

use crate::error::SimulationError;

/// Validate that a status transition is allowed.
pub fn validate_transition(
    from: SimulationStatus,
    to: SimulationStatus,
) -> Result<(), SimulationError> {
    let valid = matches!(
        (from, to),
        (SimulationStatus::Running, SimulationStatus::Paused)
            | (SimulationStatus::Paused, SimulationStatus::Running)
            | (SimulationStatus::Running, SimulationStatus::Completed)
            | (SimulationStatus::Paused, SimulationStatus::Completed)
    );

    if valid {
        Ok(())
    } else {
        Err(SimulationError::InvalidTransition(from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_to_paused() {
        assert!(validate_transition(SimulationStatus::Running, SimulationStatus::Paused).is_ok());
    }

    #[test]
    fn test_paused_to_running() {
        assert!(validate_transition(SimulationStatus::Paused, SimulationStatus::Running).is_ok());
    }

    #[test]
    fn test_running_and_paused_complete() {
        assert!(validate_transition(SimulationStatus::Running, SimulationStatus::Completed).is_ok());
        assert!(validate_transition(SimulationStatus::Paused, SimulationStatus::Completed).is_ok());
    }

    #[test]
    fn test_completed_is_terminal() {
        for to in [
            SimulationStatus::Running,
            SimulationStatus::Paused,
            SimulationStatus::Completed,
        ] {
            let err = validate_transition(SimulationStatus::Completed, to).unwrap_err();
            assert!(matches!(err, SimulationError::InvalidTransition(_, _)));
        }
    }

    #[test]
    fn test_self_transitions_rejected() {
        assert!(validate_transition(SimulationStatus::Running, SimulationStatus::Running).is_err());
        assert!(validate_transition(SimulationStatus::Paused, SimulationStatus::Paused).is_err());
    }
}
