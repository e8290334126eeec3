//! Background self-improvement analyses.
//!
//! Pattern mining and error categorization are pure functions over recent
//! event windows. Optimization planning reads project statistics from the
//! knowledge source and proposes follow-up work for the queue.

use std::collections::HashMap;

use futures::future::join_all;
use serde::Serialize;
use tracing::warn;

use crate::error::KnowledgeError;
use crate::events::LogEvent;
use crate::knowledge::KnowledgeSource;
use crate::work::{NewWorkItem, OptimizationTask, Priority, WorkContext};

/// General events scanned for tool patterns.
pub const PATTERN_WINDOW: usize = 100;
/// Error events scanned for categories.
pub const ERROR_WINDOW: usize = 50;

const MIN_PATTERN_LEN: usize = 3;
const MAX_PATTERN_LEN: usize = 5;
const MIN_PATTERN_OCCURRENCES: usize = 3;
const TOP_PATTERNS: usize = 10;
const TOP_ERROR_CATEGORIES: usize = 5;

/// Optimization work is only planned after this many completions.
pub const MIN_COMPLETED_FOR_OPTIMIZATION: u64 = 10;
/// Planning is skipped while more than this many items are pending.
pub const MAX_PENDING_FOR_OPTIMIZATION: usize = 5;
const PROJECTS_TO_SCAN: usize = 5;
const FAILURE_THRESHOLD: u64 = 5;
const PATTERN_THRESHOLD: u64 = 5;

/// A recurring sequence of tool calls within agent sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolPattern {
    pub sequence: Vec<String>,
    pub occurrences: usize,
}

/// Find tool-call sequences that keep recurring.
///
/// Tool events are grouped by session (events without one share an anonymous
/// session) and every contiguous run of 3 to 5 tool names is counted. Runs
/// seen at least 3 times are returned, most frequent first, longer runs
/// first on ties.
pub fn mine_patterns(events: &[LogEvent]) -> Vec<ToolPattern> {
    let mut sessions: Vec<(Option<&str>, Vec<&str>)> = Vec::new();
    for event in events {
        let Some(tool) = event.tool_name.as_deref() else {
            continue;
        };
        let session = event.session_id.as_deref();
        match sessions.iter_mut().find(|(id, _)| *id == session) {
            Some((_, tools)) => tools.push(tool),
            None => sessions.push((session, vec![tool])),
        }
    }

    let mut counts: HashMap<Vec<&str>, usize> = HashMap::new();
    for (_, tools) in &sessions {
        for len in MIN_PATTERN_LEN..=MAX_PATTERN_LEN {
            for window in tools.windows(len) {
                *counts.entry(window.to_vec()).or_insert(0) += 1;
            }
        }
    }

    let mut patterns: Vec<ToolPattern> = counts
        .into_iter()
        .filter(|(_, n)| *n >= MIN_PATTERN_OCCURRENCES)
        .map(|(sequence, occurrences)| ToolPattern {
            sequence: sequence.into_iter().map(str::to_string).collect(),
            occurrences,
        })
        .collect();

    patterns.sort_by(|a, b| {
        b.occurrences
            .cmp(&a.occurrences)
            .then_with(|| b.sequence.len().cmp(&a.sequence.len()))
            .then_with(|| a.sequence.cmp(&b.sequence))
    });
    patterns.truncate(TOP_PATTERNS);
    patterns
}

/// How often one kind of error occurred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorCategory {
    pub category: String,
    pub count: usize,
}

/// Category of an error event: the message text before its first `:`, or
/// the event type when there is no such prefix.
pub fn error_category(event: &LogEvent) -> String {
    event
        .message
        .as_deref()
        .and_then(|message| message.split_once(':'))
        .map(|(prefix, _)| prefix.trim())
        .filter(|prefix| !prefix.is_empty())
        .unwrap_or(event.event_type.as_str())
        .to_string()
}

/// Top error categories, most frequent first.
pub fn categorize_errors(errors: &[LogEvent]) -> Vec<ErrorCategory> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for event in errors {
        *counts.entry(error_category(event)).or_insert(0) += 1;
    }

    let mut categories: Vec<ErrorCategory> = counts
        .into_iter()
        .map(|(category, count)| ErrorCategory { category, count })
        .collect();
    categories.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.category.cmp(&b.category)));
    categories.truncate(TOP_ERROR_CATEGORIES);
    categories
}

/// Propose optimization work.
///
/// `pending` is the queue's current pending count and `open` the optimization
/// tasks that are not yet resolved; nothing equivalent to an open task is
/// proposed again.
pub async fn plan_optimizations(
    knowledge: &dyn KnowledgeSource,
    pending: usize,
    open: &[OptimizationTask],
) -> Result<Vec<NewWorkItem>, KnowledgeError> {
    if pending > MAX_PENDING_FOR_OPTIMIZATION {
        return Ok(Vec::new());
    }

    let projects = knowledge.list_projects().await?;
    let scanned: Vec<String> = projects.iter().take(PROJECTS_TO_SCAN).cloned().collect();

    let mut planned: Vec<OptimizationTask> = Vec::new();
    let propose = |task: OptimizationTask, planned: &mut Vec<OptimizationTask>| {
        if !open.iter().any(|o| o.same_target(&task)) {
            planned.push(task);
        }
    };

    let lookups: Vec<_> = scanned
        .iter()
        .map(|project| knowledge.entry_counts(project))
        .collect();
    let results = join_all(lookups).await;

    for (project, counts) in scanned.iter().zip(results) {
        let counts = match counts {
            Ok(counts) => counts,
            Err(e) => {
                warn!(project = %project, error = %e, "Skipping project in optimization scan");
                continue;
            }
        };

        if counts.failures >= FAILURE_THRESHOLD {
            propose(
                OptimizationTask::RootCauseAnalysis {
                    project: project.clone(),
                    failure_count: counts.failures,
                },
                &mut planned,
            );
        }
        if counts.patterns >= PATTERN_THRESHOLD {
            propose(
                OptimizationTask::PatternConsolidation {
                    project: project.clone(),
                    pattern_count: counts.patterns,
                },
                &mut planned,
            );
        }
    }

    if projects.len() > 1 && pending == 0 && planned.is_empty() {
        propose(
            OptimizationTask::CrossProjectConsolidation { projects: scanned },
            &mut planned,
        );
    }

    Ok(planned.into_iter().map(into_work).collect())
}

fn into_work(task: OptimizationTask) -> NewWorkItem {
    let (description, priority) = match &task {
        OptimizationTask::RootCauseAnalysis {
            project,
            failure_count,
        } => (
            format!("Investigate root causes of {failure_count} recorded failures in {project}"),
            Priority::Medium,
        ),
        OptimizationTask::PatternConsolidation {
            project,
            pattern_count,
        } => (
            format!("Consolidate {pattern_count} recorded patterns in {project}"),
            Priority::Low,
        ),
        OptimizationTask::CrossProjectConsolidation { projects } => (
            format!("Consolidate learnings across projects: {}", projects.join(", ")),
            Priority::Low,
        ),
    };

    let mut work = NewWorkItem::new(description, priority);
    if let Some(project) = task.project() {
        work = work.with_project(project);
    }
    work.with_context(WorkContext::Optimization { task })
}
