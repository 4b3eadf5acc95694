//! Error types for sessions and the transport capability.

use chipwarm_core::error::ChipwarmError;
use uuid::Uuid;

/// Failures reported by a transport implementation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to open session: {0}")]
    OpenFailed(String),
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Logout failed: {0}")]
    LogoutFailed(String),
    #[error("Own address unavailable: {0}")]
    IdentityUnavailable(String),
    #[error("Session closed")]
    Closed,
}

/// Errors from chip lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Chip not found: {0}")]
    NotFound(Uuid),
    #[error("Chip {0} belongs to another user")]
    Forbidden(Uuid),
    #[error("Chip {0} already has a live session")]
    AlreadyConnected(Uuid),
    #[error("Chip {0} is already pairing")]
    PairingInProgress(Uuid),
    #[error("No pairing artifact or connection within {0} seconds")]
    Timeout(u64),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Storage error: {0}")]
    Storage(#[from] ChipwarmError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::SendFailed("socket reset".to_string());
        assert_eq!(err.to_string(), "Send failed: socket reset");
        assert_eq!(TransportError::Closed.to_string(), "Session closed");
    }

    #[test]
    fn test_session_error_display() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(
            SessionError::NotFound(id).to_string(),
            "Chip not found: 550e8400-e29b-41d4-a716-446655440000"
        );
        assert_eq!(
            SessionError::Timeout(60).to_string(),
            "No pairing artifact or connection within 60 seconds"
        );
    }

    #[test]
    fn test_session_error_from_transport() {
        let err: SessionError = TransportError::LogoutFailed("gone".to_string()).into();
        assert!(matches!(err, SessionError::Transport(TransportError::LogoutFailed(_))));
    }

    #[test]
    fn test_session_error_from_chipwarm_error() {
        let err: SessionError = ChipwarmError::Storage("locked".to_string()).into();
        assert!(matches!(err, SessionError::Storage(_)));
        assert!(err.to_string().contains("locked"));
    }
}
