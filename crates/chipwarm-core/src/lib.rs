pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::ChipwarmConfig;
pub use error::{ChipwarmError, Result};
pub use events::DomainEvent;
pub use types::*;
