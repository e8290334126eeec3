//! Aggregate counters that survive restarts.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::document;
use crate::error::PersistenceError;

/// Loop-level statistics.
///
/// Only the counters and the last health check carry over between runs;
/// `started_at` always describes the current run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorState {
    #[serde(default)]
    pub total_completed: u64,
    #[serde(default)]
    pub total_failed: u64,
    #[serde(default)]
    pub last_health_check: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl OrchestratorState {
    /// Fresh state for a run starting now.
    pub fn new() -> Self {
        Self {
            total_completed: 0,
            total_failed: 0,
            last_health_check: None,
            started_at: Utc::now(),
            updated_at: None,
        }
    }

    /// Restore counters from `path`. Missing or unreadable files start from zero.
    pub async fn load(path: &Path) -> Self {
        let mut state = Self::new();
        match document::load::<OrchestratorState>(path).await {
            Ok(Some(saved)) => {
                info!(
                    completed = saved.total_completed,
                    failed = saved.total_failed,
                    "Restored orchestrator state"
                );
                state.total_completed = saved.total_completed;
                state.total_failed = saved.total_failed;
                state.last_health_check = saved.last_health_check;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Could not restore orchestrator state, starting from zero"),
        }
        state
    }

    /// Write the state document, stamping `updated_at`.
    pub async fn save(&mut self, path: &Path) -> Result<(), PersistenceError> {
        self.updated_at = Some(Utc::now());
        document::save(path, self).await
    }
}

impl Default for OrchestratorState {
    fn default() -> Self {
        Self::new()
    }
}
