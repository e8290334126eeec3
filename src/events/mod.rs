//! Structured event log.
//!
//! Every lifecycle transition, health check and self-improvement finding is
//! recorded as a typed [`LogEvent`] through an [`EventSink`]. The sink also
//! serves two bounded read streams back to the orchestrator: the general
//! event stream (session/tool events written by agents as well as by the
//! core) and the dedicated error stream.

pub mod jsonl;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EventLogError;

pub use jsonl::JsonlEventLog;
pub use memory::MemoryEventLog;

/// Component tags.
pub mod component {
    pub const QUEUE: &str = "queue";
    pub const ORCHESTRATOR: &str = "orchestrator";
    pub const IMPROVEMENT: &str = "improvement";
}

/// Event type names emitted by the core.
pub mod kind {
    pub const WORK_ADDED: &str = "work_added";
    pub const WORK_ASSIGNED: &str = "work_assigned";
    pub const WORK_STARTED: &str = "work_started";
    pub const WORK_COMPLETED: &str = "work_completed";
    pub const WORK_FAILED: &str = "work_failed";
    pub const WORK_RETRIED: &str = "work_retried";
    pub const WORK_TIMED_OUT: &str = "work_timed_out";
    pub const WORK_CANCELLED: &str = "work_cancelled";
    pub const PERSISTENCE_FAILED: &str = "persistence_failed";
    pub const HEALTH_CHECK: &str = "health_check";
    pub const HEALTH_WARNING: &str = "health_warning";
    pub const LOOP_ERROR: &str = "loop_error";
    pub const PATTERN_DISCOVERED: &str = "pattern_discovered";
    pub const ERROR_PATTERNS: &str = "error_patterns";
    pub const OPTIMIZATION_TASK_CREATED: &str = "optimization_task_created";
}

/// Severity of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// One structured log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: EventLevel,
    pub component: String,
    pub event_type: String,
    /// Agent session the event belongs to, for session/tool events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Tool or action name, for tool events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

impl LogEvent {
    pub fn new(level: EventLevel, component: &str, event_type: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            component: component.to_string(),
            event_type: event_type.to_string(),
            session_id: None,
            tool_name: None,
            message: None,
            data: serde_json::Value::Null,
        }
    }

    pub fn info(component: &str, event_type: &str) -> Self {
        Self::new(EventLevel::Info, component, event_type)
    }

    pub fn warning(component: &str, event_type: &str) -> Self {
        Self::new(EventLevel::Warning, component, event_type)
    }

    pub fn error(component: &str, event_type: &str) -> Self {
        Self::new(EventLevel::Error, component, event_type)
    }

    /// Builder: attach a human-readable message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Builder: attach a payload.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Builder: tag with an agent session.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Builder: tag with a tool/action name.
    pub fn with_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == EventLevel::Error
    }
}

/// Destination for structured events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Record an event. Failures to store it are logged, never returned.
    async fn record(&self, event: LogEvent);

    /// The most recent `limit` entries of the general stream, oldest first.
    async fn recent_events(&self, limit: usize) -> Result<Vec<LogEvent>, EventLogError>;

    /// The most recent `limit` entries of the error stream, oldest first.
    async fn recent_errors(&self, limit: usize) -> Result<Vec<LogEvent>, EventLogError>;
}

/// Mirror an event into `tracing` at the matching level.
pub(crate) fn trace(event: &LogEvent) {
    let message = event.message.as_deref().unwrap_or("");
    match event.level {
        EventLevel::Debug => tracing::debug!(
            component = %event.component,
            event = %event.event_type,
            data = %event.data,
            "{message}"
        ),
        EventLevel::Info => tracing::info!(
            component = %event.component,
            event = %event.event_type,
            data = %event.data,
            "{message}"
        ),
        EventLevel::Warning => tracing::warn!(
            component = %event.component,
            event = %event.event_type,
            data = %event.data,
            "{message}"
        ),
        EventLevel::Error => tracing::error!(
            component = %event.component,
            event = %event.event_type,
            data = %event.data,
            "{message}"
        ),
    }
}
