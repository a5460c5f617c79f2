// xCrack Slot Racer Library

pub mod api;
pub mod blockchain;
pub mod config;
pub mod constants;
pub mod core;
pub mod flashbots;
pub mod mempool;
pub mod mocks;
pub mod strategies;
pub mod types;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use core::{Collaborators, EngineStatus, Orchestrator};
pub use types::{EngineError, EngineResult, Event, SignedAction, SubmissionOutcome};
