//! Error types for agent-dispatch.

use std::path::PathBuf;

use uuid::Uuid;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Failures reading or writing one of the JSON documents on disk.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to encode document: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Work queue errors.
///
/// Mutations never surface persistence failures to callers; these cover
/// validation and lookups only.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Work item {id} not found")]
    NotFound { id: Uuid },

    #[error("Work item {id} is already {status}")]
    Terminal { id: Uuid, status: String },

    #[error("Work item description must not be empty")]
    EmptyDescription,
}

/// Errors raised while resolving an agent or running a work item.
///
/// Messages lead with the error kind so failures group by kind, not by agent.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutorError {
    #[error("UnknownAgent: no agent registered for identity {agent}")]
    UnknownAgent { agent: String },

    #[error("SpawnError: agent {agent} could not start: {reason}")]
    Spawn { agent: String, reason: String },

    #[error("{reason} (agent {agent})")]
    Failed { agent: String, reason: String },

    #[error("Panic: execution task panicked: {reason}")]
    Panicked { reason: String },
}

/// Knowledge/project collaborator errors.
#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error("Knowledge store unavailable: {0}")]
    Unavailable(#[from] PersistenceError),

    #[error("Unknown project: {0}")]
    UnknownProject(String),
}

/// Event log errors.
#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}
