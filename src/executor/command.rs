//! Shell-command executor.
//!
//! Each agent identity maps to a shell command. The command runs under
//! `sh -c` with the work item exposed through environment variables:
//! - `WORK_ID`, `WORK_AGENT`, `WORK_DESCRIPTION`, `WORK_PRIORITY`
//! - `WORK_PROJECT` (empty when unset)
//! - `WORK_CONTEXT` (the context as JSON)
//!
//! Standard output becomes the result. A non-zero exit is a failure whose
//! reason is the captured standard error.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{Executor, TaskAgent};
use crate::error::{ConfigError, ExecutorError};
use crate::work::WorkItem;

/// Maximum result size kept from stdout (64KB).
const MAX_OUTPUT_SIZE: usize = 64 * 1024;

/// Maximum failure reason kept from stderr.
const MAX_REASON_SIZE: usize = 2 * 1024;

/// Maps agent identities to shell commands.
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor {
    /// Fallback command for identities without an override.
    default_command: Option<String>,
    /// Per-agent commands.
    agents: HashMap<String, String>,
    /// Working directory for commands (if None, uses cwd).
    working_dir: Option<PathBuf>,
}

impl CommandExecutor {
    /// Executor running `command` for every agent.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            default_command: Some(command.into()),
            ..Default::default()
        }
    }

    /// Build from configuration. At least one command must be configured.
    pub fn from_config(
        default_command: Option<String>,
        agents: HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        if default_command.is_none() && agents.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: crate::config::ENV_EXECUTOR_CMD.to_string(),
                hint: "Set a command to run for each work item, e.g. \
                       AGENT_DISPATCH_EXECUTOR_CMD='./run-agent.sh'"
                    .to_string(),
            });
        }
        Ok(Self {
            default_command,
            agents,
            working_dir: None,
        })
    }

    /// Override the command for one agent identity.
    pub fn with_agent(mut self, agent: impl Into<String>, command: impl Into<String>) -> Self {
        self.agents.insert(agent.into(), command.into());
        self
    }

    /// Set the working directory.
    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }
}

impl Executor for CommandExecutor {
    fn resolve(&self, agent: &str) -> Result<Arc<dyn TaskAgent>, ExecutorError> {
        let command = self
            .agents
            .get(agent)
            .or(self.default_command.as_ref())
            .ok_or_else(|| ExecutorError::UnknownAgent {
                agent: agent.to_string(),
            })?;

        Ok(Arc::new(CommandAgent {
            name: agent.to_string(),
            command: command.clone(),
            working_dir: self.working_dir.clone(),
        }))
    }
}

/// One resolved agent: a command bound to an identity.
#[derive(Debug)]
pub struct CommandAgent {
    name: String,
    command: String,
    working_dir: Option<PathBuf>,
}

impl CommandAgent {
    fn build(&self, item: &WorkItem) -> Command {
        let mut command = Command::new("sh");
        command.args(["-c", &self.command]);

        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let context = serde_json::to_string(&item.context).unwrap_or_default();
        command
            .env("WORK_ID", item.id.to_string())
            .env("WORK_AGENT", &self.name)
            .env("WORK_DESCRIPTION", &item.description)
            .env("WORK_PROJECT", item.project.as_deref().unwrap_or(""))
            .env("WORK_PRIORITY", item.priority.to_string())
            .env("WORK_CONTEXT", context)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

#[async_trait]
impl TaskAgent for CommandAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, item: &WorkItem) -> Result<String, ExecutorError> {
        debug!(work_id = %item.id, agent = %self.name, "Running agent command");

        let output = self
            .build(item)
            .output()
            .await
            .map_err(|e| ExecutorError::Spawn {
                agent: self.name.clone(),
                reason: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if output.status.success() {
            return Ok(truncate(stdout.trim_end(), MAX_OUTPUT_SIZE));
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        let reason = if stderr.is_empty() {
            match output.status.code() {
                Some(code) => format!("exit status {code}"),
                None => "terminated by signal".to_string(),
            }
        } else {
            truncate(stderr, MAX_REASON_SIZE)
        };

        Err(ExecutorError::Failed {
            agent: self.name.clone(),
            reason,
        })
    }
}

/// Truncate to at most `max` bytes (UTF-8 safe), keeping the head and tail.
fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let half = max / 2;
    let head_end = floor_char_boundary(s, half);
    let tail_start = floor_char_boundary(s, s.len() - half);
    format!(
        "{}\n\n... [truncated {} bytes] ...\n\n{}",
        &s[..head_end],
        s.len() - max,
        &s[tail_start..]
    )
}

/// Find the largest byte index <= `i` that is a valid char boundary.
fn floor_char_boundary(s: &str, i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    let mut pos = i;
    while pos > 0 && !s.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}
