//! Chipwarm Simulation crate - scripted message exchanges on live chips.
//!
//! Each running simulation owns exactly one timer task that periodically
//! sends an outbound message to a contact and a synthetic reply back to the
//! bot, recording every successful send.

pub mod error;
pub mod pools;
pub mod scheduler;
pub mod state_machine;
pub mod task;

pub use error::SimulationError;
pub use pools::{Exchange, MessagePools};
pub use scheduler::SimulationScheduler;
pub use state_machine::validate_transition;
pub use task::{SimulationTask, TaskExit, TickOutcome, TimerConfig};
