//! Work item data model and its status machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default number of retries before a work item fails permanently.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Scheduling priority. Higher rank is picked first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Numeric rank used for ordering.
    pub fn rank(self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }

    pub const ALL: [Priority; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle status of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    /// Waiting to be picked up.
    Pending,
    /// Claimed by the orchestrator for an agent.
    Assigned,
    /// Dispatched to the executor.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Retries exhausted.
    Failed,
    /// Withdrawn by an external caller.
    Cancelled,
}

impl WorkStatus {
    pub const ALL: [WorkStatus; 6] = [
        Self::Pending,
        Self::Assigned,
        Self::InProgress,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: WorkStatus) -> bool {
        use WorkStatus::*;

        matches!(
            (self, target),
            (Pending, Assigned) | (Pending, Failed) | (Pending, Cancelled) |
            (Assigned, InProgress) | (Assigned, Pending) | (Assigned, Failed) |
            (Assigned, Cancelled) |
            (InProgress, Completed) | (InProgress, Pending) | (InProgress, Failed) |
            (InProgress, Cancelled)
        )
    }

    /// Completed, failed and cancelled items never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Follow-up work the orchestrator generates for itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizationTask {
    /// A project keeps recording failures.
    RootCauseAnalysis { project: String, failure_count: u64 },
    /// A project has accumulated enough reusable patterns to merge.
    PatternConsolidation { project: String, pattern_count: u64 },
    /// Share learnings across several projects.
    CrossProjectConsolidation { projects: Vec<String> },
}

impl OptimizationTask {
    /// Project this task targets, if it targets exactly one.
    pub fn project(&self) -> Option<&str> {
        match self {
            Self::RootCauseAnalysis { project, .. }
            | Self::PatternConsolidation { project, .. } => Some(project),
            Self::CrossProjectConsolidation { .. } => None,
        }
    }

    /// Two tasks are equivalent when they are the same kind for the same project.
    pub fn same_target(&self, other: &OptimizationTask) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
            && self.project() == other.project()
    }
}

/// Where a work item came from, and what the core knows about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum WorkContext {
    /// Submitted by a producer; `data` is passed through untouched.
    User {
        #[serde(default = "empty_object")]
        data: serde_json::Value,
    },
    /// Generated by the self-improvement pass.
    Optimization { task: OptimizationTask },
}

impl WorkContext {
    /// Wrap producer-supplied data.
    pub fn user(data: serde_json::Value) -> Self {
        Self::User { data }
    }

    pub fn optimization(&self) -> Option<&OptimizationTask> {
        match self {
            Self::Optimization { task } => Some(task),
            Self::User { .. } => None,
        }
    }

    pub fn is_system_generated(&self) -> bool {
        matches!(self, Self::Optimization { .. })
    }
}

impl Default for WorkContext {
    fn default() -> Self {
        Self::User {
            data: empty_object(),
        }
    }
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// A unit of schedulable work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: Uuid,
    pub description: String,
    pub priority: Priority,
    #[serde(default)]
    pub project: Option<String>,
    /// Pinned executor identity, or the agent currently holding the item.
    #[serde(default)]
    pub assigned_agent: Option<String>,
    #[serde(default)]
    pub context: WorkContext,
    pub status: WorkStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl WorkItem {
    /// Whether another attempt is allowed after a failure.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Time since dispatch began.
    pub fn running_for(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.started_at.map(|start| now.signed_duration_since(start))
    }

    /// Apply a status change, stamping `updated_at`.
    pub(crate) fn set_status(&mut self, status: WorkStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Everything a producer can specify when submitting work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewWorkItem {
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub assigned_agent: Option<String>,
    #[serde(default)]
    pub context: Option<WorkContext>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl NewWorkItem {
    pub fn new(description: impl Into<String>, priority: Priority) -> Self {
        Self {
            description: description.into(),
            priority,
            ..Default::default()
        }
    }

    /// Builder: associate with a project.
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Builder: pin to an executor identity.
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.assigned_agent = Some(agent.into());
        self
    }

    /// Builder: set context.
    pub fn with_context(mut self, context: WorkContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Builder: override the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Materialize a fresh PENDING item.
    pub fn into_item(self) -> WorkItem {
        let now = Utc::now();
        WorkItem {
            id: Uuid::new_v4(),
            description: self.description,
            priority: self.priority,
            project: self.project,
            assigned_agent: self.assigned_agent,
            context: self.context.unwrap_or_default(),
            status: WorkStatus::Pending,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            retry_count: 0,
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        }
    }
}
