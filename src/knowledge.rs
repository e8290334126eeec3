//! Read-only view of the project knowledge store.
//!
//! The self-improvement pass only needs two facts per project: how many
//! failure write-ups and how many reusable patterns have been recorded.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document;
use crate::error::KnowledgeError;

/// Per-project entry counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeCounts {
    pub failures: u64,
    pub patterns: u64,
}

/// Source of project statistics.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    /// Known projects, most recently active first.
    async fn list_projects(&self) -> Result<Vec<String>, KnowledgeError>;

    /// Failure and pattern counts for one project.
    async fn entry_counts(&self, project: &str) -> Result<KnowledgeCounts, KnowledgeError>;
}

/// Kind of a knowledge entry. Only failures and patterns are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Failure,
    Pattern,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub kind: EntryKind,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub name: String,
    #[serde(default)]
    pub last_active: Option<DateTime<Utc>>,
    #[serde(default)]
    pub entries: Vec<KnowledgeEntry>,
}

impl ProjectRecord {
    fn counts(&self) -> KnowledgeCounts {
        self.entries
            .iter()
            .fold(KnowledgeCounts::default(), |mut acc, entry| {
                match entry.kind {
                    EntryKind::Failure => acc.failures += 1,
                    EntryKind::Pattern => acc.patterns += 1,
                    EntryKind::Other => {}
                }
                acc
            })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    #[serde(default)]
    pub projects: Vec<ProjectRecord>,
}

/// Knowledge store kept in a JSON file owned by another process.
///
/// The file is re-read on every call. A missing file means no projects.
pub struct JsonKnowledgeStore {
    path: PathBuf,
}

impl JsonKnowledgeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read(&self) -> Result<KnowledgeDocument, KnowledgeError> {
        Ok(document::load(&self.path).await?.unwrap_or_default())
    }
}

#[async_trait]
impl KnowledgeSource for JsonKnowledgeStore {
    async fn list_projects(&self) -> Result<Vec<String>, KnowledgeError> {
        let mut projects = self.read().await?.projects;
        // Most recent first; never-active projects last, by name.
        projects.sort_by(|a, b| {
            b.last_active
                .cmp(&a.last_active)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(projects.into_iter().map(|p| p.name).collect())
    }

    async fn entry_counts(&self, project: &str) -> Result<KnowledgeCounts, KnowledgeError> {
        self.read()
            .await?
            .projects
            .iter()
            .find(|p| p.name == project)
            .map(ProjectRecord::counts)
            .ok_or_else(|| KnowledgeError::UnknownProject(project.to_string()))
    }
}
