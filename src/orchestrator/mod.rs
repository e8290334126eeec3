//! Scheduling loop: bounded dispatch, timeouts, health and self-improvement.

mod engine;
pub mod improvement;
mod pool;
pub mod state;

pub use engine::{ActiveSnapshot, Orchestrator, OrchestratorDeps, OrchestratorStatus, StatusHandle};
pub use state::OrchestratorState;
