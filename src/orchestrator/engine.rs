//! The orchestrator event loop.
//!
//! One task owns the active set and drives every tick: drain worker
//! outcomes, claim and dispatch the next item, sweep timed-out work, check
//! health, occasionally run the self-improvement pass, and persist the
//! aggregate counters.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::improvement::{
    self, ERROR_WINDOW, MIN_COMPLETED_FOR_OPTIMIZATION, PATTERN_WINDOW, plan_optimizations,
};
use super::pool::{Dispatch, DispatchOutcome, WorkerPool};
use super::state::OrchestratorState;
use crate::config::OrchestratorConfig;
use crate::events::{EventSink, LogEvent, component, kind};
use crate::executor::Executor;
use crate::knowledge::KnowledgeSource;
use crate::work::{OptimizationTask, WorkQueue, WorkStatus};

/// Collaborators the orchestrator drives.
pub struct OrchestratorDeps {
    pub queue: Arc<WorkQueue>,
    pub executor: Arc<dyn Executor>,
    pub knowledge: Arc<dyn KnowledgeSource>,
    pub events: Arc<dyn EventSink>,
}

/// An item currently handed to the worker pool.
struct ActiveWork {
    dispatch_id: Uuid,
    agent: String,
    started_at: DateTime<Utc>,
    abandon: oneshot::Sender<()>,
}

/// One entry of the active set, as published in status snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveSnapshot {
    pub work_id: Uuid,
    pub agent: String,
    pub started_at: DateTime<Utc>,
}

/// Point-in-time view of the loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestratorStatus {
    pub running: bool,
    pub iteration: u64,
    pub max_concurrent_work: usize,
    pub active: Vec<ActiveSnapshot>,
    pub total_completed: u64,
    pub total_failed: u64,
    pub last_health_check: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
}

/// Receiver side of the status feed.
pub type StatusHandle = watch::Receiver<OrchestratorStatus>;

pub struct Orchestrator {
    config: OrchestratorConfig,
    deps: OrchestratorDeps,
    state_path: PathBuf,
    state: OrchestratorState,
    active: HashMap<Uuid, ActiveWork>,
    pool: WorkerPool,
    results_rx: mpsc::UnboundedReceiver<DispatchOutcome>,
    iteration: u64,
    status_tx: watch::Sender<OrchestratorStatus>,
}

impl Orchestrator {
    /// Restore counters from `state_path` and start the worker pool.
    pub async fn new(
        config: OrchestratorConfig,
        deps: OrchestratorDeps,
        state_path: impl Into<PathBuf>,
    ) -> Self {
        let state_path = state_path.into();
        let state = OrchestratorState::load(&state_path).await;

        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let pool = WorkerPool::spawn(config.max_concurrent_work, results_tx);

        let (status_tx, _) = watch::channel(OrchestratorStatus {
            running: false,
            iteration: 0,
            max_concurrent_work: config.max_concurrent_work,
            active: Vec::new(),
            total_completed: state.total_completed,
            total_failed: state.total_failed,
            last_health_check: state.last_health_check,
            started_at: state.started_at,
        });

        Self {
            config,
            deps,
            state_path,
            state,
            active: HashMap::new(),
            pool,
            results_rx,
            iteration: 0,
            status_tx,
        }
    }

    /// Subscribe to status snapshots, published after every tick.
    pub fn status(&self) -> StatusHandle {
        self.status_tx.subscribe()
    }

    pub fn state(&self) -> &OrchestratorState {
        &self.state
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_active(&self, id: Uuid) -> bool {
        self.active.contains_key(&id)
    }

    /// Run until `shutdown` resolves, then persist state and stop the pool.
    ///
    /// In-flight executions are not awaited; their items stay IN_PROGRESS.
    pub async fn run<F>(mut self, shutdown: F) -> OrchestratorState
    where
        F: Future<Output = ()>,
    {
        info!(
            max_concurrent = self.config.max_concurrent_work,
            interval_secs = self.config.check_interval.as_secs_f64(),
            workers = self.pool.size(),
            "Orchestrator started"
        );

        let mut ticker = tokio::time::interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping orchestrator");
                    break;
                }
                Some(outcome) = self.results_rx.recv() => {
                    self.record_outcome(outcome).await;
                    self.publish_status(true);
                }
                _ = ticker.tick() => self.tick().await,
            }
        }

        self.persist_state().await;
        self.publish_status(false);
        if !self.active.is_empty() {
            warn!(
                in_flight = self.active.len(),
                "Leaving in-flight work unresolved at shutdown"
            );
        }
        self.state
    }

    /// One loop iteration.
    pub async fn tick(&mut self) {
        self.iteration += 1;

        self.drain_outcomes().await;
        self.dispatch_next().await;
        self.sweep_timeouts().await;
        self.health_check().await;

        if self.iteration % self.config.improvement_every.max(1) == 0 {
            if self.active.len() < self.config.max_concurrent_work {
                self.improve().await;
            } else {
                debug!("At capacity, skipping self-improvement pass");
            }
        }

        self.persist_state().await;
        self.publish_status(true);
    }

    async fn drain_outcomes(&mut self) {
        while let Ok(outcome) = self.results_rx.try_recv() {
            self.record_outcome(outcome).await;
        }
    }

    /// Wait for the next worker outcome and record it.
    ///
    /// Returns `false` once every worker has stopped.
    pub async fn next_outcome(&mut self) -> bool {
        match self.results_rx.recv().await {
            Some(outcome) => {
                self.record_outcome(outcome).await;
                self.publish_status(true);
                true
            }
            None => false,
        }
    }

    async fn record_outcome(&mut self, outcome: DispatchOutcome) {
        let DispatchOutcome {
            work_id,
            dispatch_id,
            result,
        } = outcome;

        match self.active.get(&work_id) {
            Some(active) if active.dispatch_id == dispatch_id => {}
            _ => {
                debug!(work_id = %work_id, "Discarding outcome of an abandoned dispatch");
                return;
            }
        }
        self.active.remove(&work_id);

        let queue = &self.deps.queue;
        match result {
            Ok(output) => {
                if queue.mark_completed(work_id, Some(output)).await.is_some() {
                    self.state.total_completed += 1;
                }
            }
            Err(e) => {
                if queue.mark_failed(work_id, &e.to_string(), true).await.is_some() {
                    self.state.total_failed += 1;
                }
            }
        }
    }

    async fn dispatch_next(&mut self) {
        if self.active.len() >= self.config.max_concurrent_work {
            return;
        }

        let queue = Arc::clone(&self.deps.queue);
        let Some(claimed) = queue
            .claim_next(&self.config.default_agent, None, None)
            .await
        else {
            return;
        };
        let work_id = claimed.id;
        let agent_name = claimed
            .assigned_agent
            .clone()
            .unwrap_or_else(|| self.config.default_agent.clone());

        let agent = match self.deps.executor.resolve(&agent_name) {
            Ok(agent) => agent,
            Err(e) => {
                warn!(
                    work_id = %work_id,
                    agent = %agent_name,
                    error = %e,
                    "Could not resolve agent"
                );
                if queue.mark_failed(work_id, &e.to_string(), true).await.is_some() {
                    self.state.total_failed += 1;
                }
                return;
            }
        };

        let Some(item) = queue.mark_in_progress(work_id).await else {
            debug!(work_id = %work_id, "Claimed item changed before dispatch, skipping");
            return;
        };

        let dispatch_id = Uuid::new_v4();
        let (abandon_tx, abandon_rx) = oneshot::channel();
        self.active.insert(
            work_id,
            ActiveWork {
                dispatch_id,
                agent: agent_name.clone(),
                started_at: item.started_at.unwrap_or_else(Utc::now),
                abandon: abandon_tx,
            },
        );

        let dispatch = Dispatch {
            dispatch_id,
            item,
            agent,
            abandon: abandon_rx,
        };
        if self.pool.dispatch(dispatch).await.is_err() {
            self.active.remove(&work_id);
            self.loop_error("dispatch", "worker pool is closed").await;
            if queue
                .mark_failed(work_id, "Dispatch: worker pool is closed", true)
                .await
                .is_some()
            {
                self.state.total_failed += 1;
            }
            return;
        }

        info!(
            work_id = %work_id,
            agent = %agent_name,
            active = self.active.len(),
            "Dispatched work item"
        );
    }

    async fn sweep_timeouts(&mut self) {
        let now = Utc::now();
        let timeout = self.config.work_timeout;
        let expired: Vec<Uuid> = self
            .active
            .iter()
            .filter(|(_, work)| {
                (now - work.started_at)
                    .to_std()
                    .is_ok_and(|elapsed| elapsed > timeout)
            })
            .map(|(id, _)| *id)
            .collect();

        for work_id in expired {
            let Some(work) = self.active.remove(&work_id) else {
                continue;
            };
            // The worker may already be gone; the detached execution is left alone.
            let _ = work.abandon.send(());

            let message = format!("Timeout: no result after {}s", timeout.as_secs());
            self.deps
                .events
                .record(
                    LogEvent::warning(component::ORCHESTRATOR, kind::WORK_TIMED_OUT)
                        .with_message(message.clone())
                        .with_data(serde_json::json!({
                            "work_id": work_id,
                            "agent": work.agent,
                            "started_at": work.started_at,
                        })),
                )
                .await;

            if self
                .deps
                .queue
                .mark_failed(work_id, &message, true)
                .await
                .is_some()
            {
                self.state.total_failed += 1;
            }
        }
    }

    async fn health_check(&mut self) {
        let summary = self.deps.queue.summary().await;
        let failed = summary.count(WorkStatus::Failed);

        if failed > self.config.failed_warning_threshold {
            self.deps
                .events
                .record(
                    LogEvent::warning(component::ORCHESTRATOR, kind::HEALTH_WARNING)
                        .with_message(format!("{failed} work items have failed permanently"))
                        .with_data(serde_json::json!({ "failed": failed })),
                )
                .await;
        }

        self.deps
            .events
            .record(
                LogEvent::info(component::ORCHESTRATOR, kind::HEALTH_CHECK).with_data(
                    serde_json::json!({
                        "iteration": self.iteration,
                        "active": self.active.len(),
                        "queue": summary,
                        "total_completed": self.state.total_completed,
                        "total_failed": self.state.total_failed,
                    }),
                ),
            )
            .await;

        self.state.last_health_check = Some(Utc::now());
    }

    async fn improve(&mut self) {
        let events = Arc::clone(&self.deps.events);

        match events.recent_events(PATTERN_WINDOW).await {
            Ok(recent) => {
                for pattern in improvement::mine_patterns(&recent) {
                    events
                        .record(
                            LogEvent::info(component::IMPROVEMENT, kind::PATTERN_DISCOVERED)
                                .with_message(pattern.sequence.join(" -> "))
                                .with_data(serde_json::json!(pattern)),
                        )
                        .await;
                }
            }
            Err(e) => self.loop_error("pattern_mining", e).await,
        }

        match events.recent_errors(ERROR_WINDOW).await {
            Ok(errors) => {
                let categories = improvement::categorize_errors(&errors);
                if !categories.is_empty() {
                    events
                        .record(
                            LogEvent::info(component::IMPROVEMENT, kind::ERROR_PATTERNS)
                                .with_data(serde_json::json!({
                                    "window": errors.len(),
                                    "categories": categories,
                                })),
                        )
                        .await;
                }
            }
            Err(e) => self.loop_error("error_analysis", e).await,
        }

        if self.active.is_empty() && self.state.total_completed > MIN_COMPLETED_FOR_OPTIMIZATION {
            self.generate_optimizations().await;
        }
    }

    async fn generate_optimizations(&mut self) {
        let queue = Arc::clone(&self.deps.queue);
        let pending = queue.pending_count().await;
        let open: Vec<OptimizationTask> = queue
            .all()
            .await
            .into_iter()
            .filter(|item| !item.status.is_terminal())
            .filter_map(|item| item.context.optimization().cloned())
            .collect();

        let planned = match plan_optimizations(self.deps.knowledge.as_ref(), pending, &open).await {
            Ok(planned) => planned,
            Err(e) => {
                self.loop_error("optimization", e).await;
                return;
            }
        };

        for work in planned {
            let item = queue.add_item(work).await;
            self.deps
                .events
                .record(
                    LogEvent::info(component::IMPROVEMENT, kind::OPTIMIZATION_TASK_CREATED)
                        .with_message(item.description.clone())
                        .with_data(serde_json::json!({
                            "work_id": item.id,
                            "task": item.context.optimization(),
                        })),
                )
                .await;
        }
    }

    async fn persist_state(&mut self) {
        if let Err(e) = self.state.save(&self.state_path).await {
            error!(
                path = %self.state_path.display(),
                error = %e,
                "Failed to persist orchestrator state"
            );
            self.deps
                .events
                .record(
                    LogEvent::error(component::ORCHESTRATOR, kind::PERSISTENCE_FAILED)
                        .with_message(format!("PersistenceError: {e}")),
                )
                .await;
        }
    }

    async fn loop_error(&self, step: &str, e: impl std::fmt::Display) {
        error!(step, error = %e, "Orchestrator step failed");
        self.deps
            .events
            .record(
                LogEvent::error(component::ORCHESTRATOR, kind::LOOP_ERROR)
                    .with_message(format!("{step}: {e}")),
            )
            .await;
    }

    fn publish_status(&self, running: bool) {
        let mut active: Vec<ActiveSnapshot> = self
            .active
            .iter()
            .map(|(id, work)| ActiveSnapshot {
                work_id: *id,
                agent: work.agent.clone(),
                started_at: work.started_at,
            })
            .collect();
        active.sort_by_key(|a| (a.started_at, a.work_id));

        self.status_tx.send_replace(OrchestratorStatus {
            running,
            iteration: self.iteration,
            max_concurrent_work: self.config.max_concurrent_work,
            active,
            total_completed: self.state.total_completed,
            total_failed: self.state.total_failed,
            last_health_check: self.state.last_health_check,
            started_at: self.state.started_at,
        });
    }
}
