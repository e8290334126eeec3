//! Configuration types.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

pub const ENV_DATA_DIR: &str = "AGENT_DISPATCH_DATA_DIR";
pub const ENV_CHECK_INTERVAL_SECS: &str = "AGENT_DISPATCH_CHECK_INTERVAL_SECS";
pub const ENV_MAX_CONCURRENT: &str = "AGENT_DISPATCH_MAX_CONCURRENT";
pub const ENV_WORK_TIMEOUT_SECS: &str = "AGENT_DISPATCH_WORK_TIMEOUT_SECS";
pub const ENV_DEFAULT_AGENT: &str = "AGENT_DISPATCH_DEFAULT_AGENT";
pub const ENV_EXECUTOR_CMD: &str = "AGENT_DISPATCH_EXECUTOR_CMD";
pub const ENV_AGENT_COMMANDS: &str = "AGENT_DISPATCH_AGENT_COMMANDS";
pub const ENV_KNOWLEDGE_PATH: &str = "AGENT_DISPATCH_KNOWLEDGE_PATH";
pub const ENV_API_PORT: &str = "AGENT_DISPATCH_API_PORT";
pub const ENV_PRUNE_AFTER_HOURS: &str = "AGENT_DISPATCH_PRUNE_AFTER_HOURS";

const QUEUE_FILE: &str = "work_queue.json";
const STATE_FILE: &str = "orchestrator_state.json";
const KNOWLEDGE_FILE: &str = "knowledge.json";
const LOG_DIR: &str = "logs";

/// Orchestrator loop settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Time between loop ticks.
    pub check_interval: Duration,
    /// Upper bound on concurrently executing items (and worker tasks).
    pub max_concurrent_work: usize,
    /// Wall-clock budget for one execution before it is force-failed.
    pub work_timeout: Duration,
    /// Agent used for items that are not pinned to one.
    pub default_agent: String,
    /// Run the self-improvement pass every this many ticks.
    pub improvement_every: u64,
    /// Health warning threshold for FAILED items.
    pub failed_warning_threshold: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            max_concurrent_work: 3,
            work_timeout: Duration::from_secs(3600), // 1 hour
            default_agent: "orchestrator".to_string(),
            improvement_every: 10,
            failed_warning_threshold: 10,
        }
    }
}

/// Process-level configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Directory holding the queue, state and log files.
    pub data_dir: PathBuf,
    pub orchestrator: OrchestratorConfig,
    /// Shell command run for every item unless its agent has an override.
    pub executor_command: Option<String>,
    /// Per-agent command overrides.
    pub agent_commands: HashMap<String, String>,
    /// Knowledge store file; defaults to `<data_dir>/knowledge.json`.
    pub knowledge_path: Option<PathBuf>,
    /// HTTP API port. The API is disabled when unset.
    pub api_port: Option<u16>,
    /// Completed items older than this are pruned at startup.
    pub prune_after_hours: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            orchestrator: OrchestratorConfig::default(),
            executor_command: None,
            agent_commands: HashMap::new(),
            knowledge_path: None,
            api_port: None,
            prune_after_hours: 168, // 1 week
        }
    }
}

impl DispatchConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let data_dir = get(ENV_DATA_DIR)
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let check_interval_secs: u64 = parse_or(&get, ENV_CHECK_INTERVAL_SECS, 5)?;
        if check_interval_secs == 0 {
            return Err(invalid(ENV_CHECK_INTERVAL_SECS, "must be at least 1"));
        }

        let max_concurrent_work: usize = parse_or(&get, ENV_MAX_CONCURRENT, 3)?;
        if max_concurrent_work == 0 {
            return Err(invalid(ENV_MAX_CONCURRENT, "must be at least 1"));
        }

        let work_timeout_secs: u64 = parse_or(&get, ENV_WORK_TIMEOUT_SECS, 3600)?;

        let default_agent =
            get(ENV_DEFAULT_AGENT).unwrap_or(defaults.orchestrator.default_agent);

        let agent_commands = match get(ENV_AGENT_COMMANDS) {
            Some(raw) => serde_json::from_str::<HashMap<String, String>>(&raw)
                .map_err(|e| invalid(ENV_AGENT_COMMANDS, &format!("expected a JSON object: {e}")))?,
            None => HashMap::new(),
        };

        let api_port = match get(ENV_API_PORT) {
            Some(raw) => Some(
                raw.trim()
                    .parse::<u16>()
                    .map_err(|e| invalid(ENV_API_PORT, &e.to_string()))?,
            ),
            None => None,
        };

        Ok(Self {
            data_dir,
            orchestrator: OrchestratorConfig {
                check_interval: Duration::from_secs(check_interval_secs),
                max_concurrent_work,
                work_timeout: Duration::from_secs(work_timeout_secs),
                default_agent,
                ..defaults.orchestrator
            },
            executor_command: get(ENV_EXECUTOR_CMD),
            agent_commands,
            knowledge_path: get(ENV_KNOWLEDGE_PATH).map(PathBuf::from),
            api_port,
            prune_after_hours: parse_or(&get, ENV_PRUNE_AFTER_HOURS, defaults.prune_after_hours)?,
        })
    }

    pub fn queue_path(&self) -> PathBuf {
        self.data_dir.join(QUEUE_FILE)
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join(STATE_FILE)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join(LOG_DIR)
    }

    pub fn knowledge_path(&self) -> PathBuf {
        self.knowledge_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(KNOWLEDGE_FILE))
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| invalid(key, &e.to_string())),
        None => Ok(default),
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
