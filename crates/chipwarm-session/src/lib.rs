//! Chipwarm Session crate - live transport sessions and the chip lifecycle.
//!
//! The [`SessionRegistry`] is the process-local truth for "is this chip
//! connected". The [`ChipLifecycleManager`] opens sessions through a
//! [`TransportGateway`], consumes their state changes, and reconciles the
//! persisted chip status with what the transport reports.

pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod mock;
pub mod registry;
pub mod response_slot;

pub use error::{SessionError, TransportError};
pub use gateway::{OpenedSession, PairingArtifact, StateChange, TransportGateway, TransportSession};
pub use lifecycle::{ChipEventListener, ChipLifecycleManager, ConnectOutcome, StatusReport};
pub use mock::{MockGateway, MockSession};
pub use registry::{SessionHandle, SessionRegistry};
pub use response_slot::ResponseSlot;
