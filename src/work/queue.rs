//! Durable priority work queue.
//!
//! The full item set lives in memory behind one coarse lock and is written
//! back to a single JSON document after every mutation, while the lock is
//! still held. Selecting the next item and claiming it happen under the same
//! lock acquisition, so concurrent dispatchers can never claim the same item.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::model::{NewWorkItem, Priority, WorkContext, WorkItem, WorkStatus};
use crate::document;
use crate::error::{PersistenceError, QueueError};
use crate::events::{EventSink, LogEvent, component, kind};

/// Version stamped into the queue document.
const DOCUMENT_VERSION: u32 = 1;

#[derive(Deserialize)]
struct QueueDocument {
    #[allow(dead_code)]
    version: u32,
    items: Vec<WorkItem>,
}

#[derive(Serialize)]
struct QueueDocumentRef<'a> {
    version: u32,
    updated_at: DateTime<Utc>,
    items: Vec<&'a WorkItem>,
}

/// Counts by status, plus a priority breakdown of pending work.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSummary {
    pub total: usize,
    pub pending: usize,
    pub assigned: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub pending_by_priority: BTreeMap<Priority, usize>,
}

impl QueueSummary {
    fn from_items<'a>(items: impl Iterator<Item = &'a WorkItem>) -> Self {
        let mut summary = Self {
            pending_by_priority: Priority::ALL.iter().map(|p| (*p, 0)).collect(),
            ..Default::default()
        };
        for item in items {
            summary.total += 1;
            *summary.slot(item.status) += 1;
            if item.status == WorkStatus::Pending {
                *summary.pending_by_priority.entry(item.priority).or_insert(0) += 1;
            }
        }
        summary
    }

    fn slot(&mut self, status: WorkStatus) -> &mut usize {
        match status {
            WorkStatus::Pending => &mut self.pending,
            WorkStatus::Assigned => &mut self.assigned,
            WorkStatus::InProgress => &mut self.in_progress,
            WorkStatus::Completed => &mut self.completed,
            WorkStatus::Failed => &mut self.failed,
            WorkStatus::Cancelled => &mut self.cancelled,
        }
    }

    /// Number of items in `status`.
    pub fn count(&self, status: WorkStatus) -> usize {
        match status {
            WorkStatus::Pending => self.pending,
            WorkStatus::Assigned => self.assigned,
            WorkStatus::InProgress => self.in_progress,
            WorkStatus::Completed => self.completed,
            WorkStatus::Failed => self.failed,
            WorkStatus::Cancelled => self.cancelled,
        }
    }
}

/// Pick the pending item that should run next.
///
/// Highest priority rank wins; ties go to the earliest `created_at`, then the
/// smallest id so the order is total.
fn select_next<'a>(
    items: impl Iterator<Item = &'a WorkItem>,
    agent_filter: Option<&str>,
    project_filter: Option<&str>,
) -> Option<&'a WorkItem> {
    items
        .filter(|item| item.status == WorkStatus::Pending)
        .filter(|item| match (agent_filter, item.assigned_agent.as_deref()) {
            (Some(agent), Some(pinned)) => agent == pinned,
            _ => true,
        })
        .filter(|item| match project_filter {
            Some(project) => item.project.as_deref() == Some(project),
            None => true,
        })
        .max_by_key(|item| (item.priority.rank(), Reverse(item.created_at), Reverse(item.id)))
}

/// Durable, priority-ordered store of work items.
pub struct WorkQueue {
    path: PathBuf,
    items: Mutex<HashMap<Uuid, WorkItem>>,
    events: Arc<dyn EventSink>,
}

impl WorkQueue {
    /// Open the queue document at `path`.
    ///
    /// A missing document starts an empty queue. An unreadable one is logged
    /// and also starts empty; it is overwritten by the next mutation.
    pub async fn open(path: impl Into<PathBuf>, events: Arc<dyn EventSink>) -> Self {
        let path = path.into();
        let items = match document::load::<QueueDocument>(&path).await {
            Ok(Some(doc)) => {
                info!(path = %path.display(), count = doc.items.len(), "Loaded work queue");
                doc.items.into_iter().map(|item| (item.id, item)).collect()
            }
            Ok(None) => {
                debug!(path = %path.display(), "No queue document yet, starting empty");
                HashMap::new()
            }
            Err(e) => {
                error!(
                    path = %path.display(),
                    error = %e,
                    "Failed to load work queue, starting empty"
                );
                events
                    .record(
                        LogEvent::error(component::QUEUE, kind::PERSISTENCE_FAILED)
                            .with_message(format!("LoadError: {e}")),
                    )
                    .await;
                HashMap::new()
            }
        };

        Self {
            path,
            items: Mutex::new(items),
            events,
        }
    }

    /// Location of the queue document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, items: &HashMap<Uuid, WorkItem>) {
        let mut ordered: Vec<&WorkItem> = items.values().collect();
        ordered.sort_by_key(|item| (item.created_at, item.id));

        let doc = QueueDocumentRef {
            version: DOCUMENT_VERSION,
            updated_at: Utc::now(),
            items: ordered,
        };

        if let Err(e) = document::save(&self.path, &doc).await {
            self.report_persistence_failure(&e).await;
        }
    }

    async fn report_persistence_failure(&self, e: &PersistenceError) {
        error!(path = %self.path.display(), error = %e, "Failed to persist work queue");
        self.events
            .record(
                LogEvent::error(component::QUEUE, kind::PERSISTENCE_FAILED)
                    .with_message(format!("PersistenceError: {e}")),
            )
            .await;
    }

    async fn emit(&self, event: LogEvent) {
        self.events.record(event).await;
    }

    /// Create a PENDING item and persist it.
    ///
    /// Never fails: a persistence error is logged and the in-memory insert stands.
    pub async fn add(
        &self,
        description: impl Into<String>,
        priority: Priority,
        project: Option<String>,
        assigned_agent: Option<String>,
        context: Option<WorkContext>,
    ) -> WorkItem {
        self.add_item(NewWorkItem {
            description: description.into(),
            priority,
            project,
            assigned_agent,
            context,
            max_retries: None,
        })
        .await
    }

    /// Create a PENDING item from a full submission.
    pub async fn add_item(&self, new: NewWorkItem) -> WorkItem {
        if new.description.trim().is_empty() {
            warn!("Adding work item with an empty description");
        }

        let item = new.into_item();
        {
            let mut items = self.items.lock().await;
            items.insert(item.id, item.clone());
            self.persist(&items).await;
        }

        info!(
            work_id = %item.id,
            priority = %item.priority,
            project = item.project.as_deref().unwrap_or("-"),
            "Work item added"
        );
        self.emit(
            LogEvent::info(component::QUEUE, kind::WORK_ADDED)
                .with_message(item.description.clone())
                .with_data(serde_json::json!({
                    "work_id": item.id,
                    "priority": item.priority,
                    "project": item.project,
                    "system_generated": item.context.is_system_generated(),
                })),
        )
        .await;

        item
    }

    /// The pending item that would run next, without claiming it.
    pub async fn next(
        &self,
        agent_filter: Option<&str>,
        project_filter: Option<&str>,
    ) -> Option<WorkItem> {
        let items = self.items.lock().await;
        select_next(items.values(), agent_filter, project_filter).cloned()
    }

    /// Select the next pending item and mark it ASSIGNED in one step.
    ///
    /// The item goes to its pinned agent, or `default_agent` when unpinned.
    pub async fn claim_next(
        &self,
        default_agent: &str,
        agent_filter: Option<&str>,
        project_filter: Option<&str>,
    ) -> Option<WorkItem> {
        let claimed = {
            let mut items = self.items.lock().await;
            let id = select_next(items.values(), agent_filter, project_filter)?.id;
            let item = items.get_mut(&id)?;
            let agent = item
                .assigned_agent
                .clone()
                .unwrap_or_else(|| default_agent.to_string());
            item.assigned_agent = Some(agent);
            item.set_status(WorkStatus::Assigned);
            let claimed = item.clone();
            self.persist(&items).await;
            claimed
        };

        self.emit_assigned(&claimed).await;
        Some(claimed)
    }

    async fn emit_assigned(&self, item: &WorkItem) {
        let agent = item.assigned_agent.as_deref().unwrap_or("-");
        debug!(work_id = %item.id, agent, "Work item assigned");
        self.emit(
            LogEvent::info(component::QUEUE, kind::WORK_ASSIGNED).with_data(serde_json::json!({
                "work_id": item.id,
                "agent": agent,
            })),
        )
        .await;
    }

    /// Apply `f` to item `id` if it may move to `target`; persist and return the result.
    async fn transition<F>(&self, id: Uuid, target: WorkStatus, f: F) -> Option<WorkItem>
    where
        F: FnOnce(&mut WorkItem),
    {
        let mut items = self.items.lock().await;
        let item = match items.get_mut(&id) {
            Some(item) => item,
            None => {
                debug!(work_id = %id, target = %target, "Ignoring transition for unknown item");
                return None;
            }
        };

        if !item.status.can_transition_to(target) {
            warn!(
                work_id = %id,
                from = %item.status,
                to = %target,
                "Rejected invalid work item transition"
            );
            return None;
        }

        f(item);
        let updated = item.clone();
        self.persist(&items).await;
        Some(updated)
    }

    /// PENDING → ASSIGNED to `agent`.
    pub async fn mark_assigned(&self, id: Uuid, agent: &str) -> Option<WorkItem> {
        let item = self
            .transition(id, WorkStatus::Assigned, |item| {
                item.assigned_agent = Some(agent.to_string());
                item.set_status(WorkStatus::Assigned);
            })
            .await?;
        self.emit_assigned(&item).await;
        Some(item)
    }

    /// ASSIGNED → IN_PROGRESS, stamping `started_at`.
    pub async fn mark_in_progress(&self, id: Uuid) -> Option<WorkItem> {
        let item = self
            .transition(id, WorkStatus::InProgress, |item| {
                item.set_status(WorkStatus::InProgress);
                item.started_at = Some(item.updated_at);
            })
            .await?;

        debug!(work_id = %id, "Work item started");
        self.emit(
            LogEvent::info(component::QUEUE, kind::WORK_STARTED).with_data(serde_json::json!({
                "work_id": id,
                "agent": item.assigned_agent,
                "attempt": item.retry_count + 1,
            })),
        )
        .await;
        Some(item)
    }

    /// Resolve as COMPLETED with an optional result.
    pub async fn mark_completed(&self, id: Uuid, result: Option<String>) -> Option<WorkItem> {
        let item = self
            .transition(id, WorkStatus::Completed, |item| {
                item.set_status(WorkStatus::Completed);
                item.completed_at = Some(item.updated_at);
                item.result = result;
            })
            .await?;

        info!(work_id = %id, "Work item completed");
        self.emit(
            LogEvent::info(component::QUEUE, kind::WORK_COMPLETED).with_data(serde_json::json!({
                "work_id": id,
                "agent": item.assigned_agent,
                "retry_count": item.retry_count,
            })),
        )
        .await;
        Some(item)
    }

    /// Record a failure.
    ///
    /// `retry_count` always goes up (never past `max_retries`) and `error` is
    /// stored. With `retry` set and budget left after the increment, the item
    /// returns to PENDING with its assignee cleared; otherwise it is FAILED.
    pub async fn mark_failed(&self, id: Uuid, error: &str, retry: bool) -> Option<WorkItem> {
        let item = {
            let mut items = self.items.lock().await;
            let item = match items.get_mut(&id) {
                Some(item) => item,
                None => {
                    debug!(work_id = %id, "Ignoring failure for unknown work item");
                    return None;
                }
            };
            if item.status.is_terminal() {
                warn!(work_id = %id, status = %item.status, "Ignoring failure for resolved item");
                return None;
            }

            item.retry_count = (item.retry_count + 1).min(item.max_retries);
            item.error = Some(error.to_string());
            if retry && item.can_retry() {
                item.set_status(WorkStatus::Pending);
                item.assigned_agent = None;
                item.started_at = None;
            } else {
                item.set_status(WorkStatus::Failed);
                item.completed_at = Some(item.updated_at);
            }
            let updated = item.clone();
            self.persist(&items).await;
            updated
        };

        let will_retry = item.status == WorkStatus::Pending;
        warn!(
            work_id = %id,
            retry_count = item.retry_count,
            max_retries = item.max_retries,
            will_retry,
            error,
            "Work item failed"
        );
        self.emit(
            LogEvent::error(component::QUEUE, kind::WORK_FAILED)
                .with_message(error.to_string())
                .with_data(serde_json::json!({
                    "work_id": id,
                    "retry_count": item.retry_count,
                    "max_retries": item.max_retries,
                    "will_retry": will_retry,
                })),
        )
        .await;
        if will_retry {
            self.emit(
                LogEvent::info(component::QUEUE, kind::WORK_RETRIED).with_data(serde_json::json!({
                    "work_id": id,
                    "retry_count": item.retry_count,
                })),
            )
            .await;
        }
        Some(item)
    }

    /// Withdraw a non-terminal item.
    pub async fn cancel(&self, id: Uuid) -> Result<WorkItem, QueueError> {
        let item = {
            let mut items = self.items.lock().await;
            let item = items.get_mut(&id).ok_or(QueueError::NotFound { id })?;
            if item.status.is_terminal() {
                return Err(QueueError::Terminal {
                    id,
                    status: item.status.to_string(),
                });
            }
            item.set_status(WorkStatus::Cancelled);
            let cancelled = item.clone();
            self.persist(&items).await;
            cancelled
        };

        info!(work_id = %id, "Work item cancelled");
        self.emit(
            LogEvent::info(component::QUEUE, kind::WORK_CANCELLED)
                .with_data(serde_json::json!({ "work_id": id })),
        )
        .await;
        Ok(item)
    }

    pub async fn get(&self, id: Uuid) -> Option<WorkItem> {
        self.items.lock().await.get(&id).cloned()
    }

    /// Items in `status`, oldest first.
    pub async fn by_status(&self, status: WorkStatus) -> Vec<WorkItem> {
        self.collect_sorted(|item| item.status == status).await
    }

    /// Items belonging to `project`, oldest first.
    pub async fn by_project(&self, project: &str) -> Vec<WorkItem> {
        self.collect_sorted(|item| item.project.as_deref() == Some(project))
            .await
    }

    /// Every item, oldest first.
    pub async fn all(&self) -> Vec<WorkItem> {
        self.collect_sorted(|_| true).await
    }

    async fn collect_sorted<F>(&self, keep: F) -> Vec<WorkItem>
    where
        F: Fn(&WorkItem) -> bool,
    {
        let items = self.items.lock().await;
        let mut out: Vec<WorkItem> = items.values().filter(|i| keep(i)).cloned().collect();
        out.sort_by_key(|item| (item.created_at, item.id));
        out
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    pub async fn pending_count(&self) -> usize {
        self.items
            .lock()
            .await
            .values()
            .filter(|item| item.status == WorkStatus::Pending)
            .count()
    }

    pub async fn summary(&self) -> QueueSummary {
        QueueSummary::from_items(self.items.lock().await.values())
    }

    /// Drop COMPLETED items whose `completed_at` is older than the cutoff.
    /// Returns how many were removed.
    ///
    /// A window too large to represent reaches before any timestamp, so
    /// nothing is removed.
    pub async fn prune(&self, older_than_hours: u64) -> usize {
        let cutoff = i64::try_from(older_than_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .and_then(|window| Utc::now().checked_sub_signed(window));
        let Some(cutoff) = cutoff else {
            debug!(older_than_hours, "Prune window out of range, nothing to remove");
            return 0;
        };

        let mut items = self.items.lock().await;
        let before = items.len();
        items.retain(|_, item| {
            !(item.status == WorkStatus::Completed
                && item.completed_at.is_some_and(|done| done < cutoff))
        });
        let removed = before - items.len();

        if removed > 0 {
            self.persist(&items).await;
            info!(removed, older_than_hours, "Pruned completed work items");
        }
        removed
    }
}
