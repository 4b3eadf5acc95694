//! Chipwarm Storage crate - SQLite persistence for users, chips,
//! simulations and simulated messages.
//!
//! Provides a WAL-mode SQLite database with versioned migrations and one
//! repository per entity. Every repository call is individually atomic;
//! there are no cross-entity transactions.

pub mod db;
pub mod migrations;
pub mod repository;

pub use db::Database;
pub use repository::{
    ChipRepository, MessageRepository, PlanRepository, SimulationRepository, UserRepository,
};
