//! Integration tests for the orchestrator loop.
//!
//! Each test builds a real queue on a temp dir and drives the loop tick by
//! tick against stub executors and knowledge sources.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tempfile::TempDir;
use tokio::time::timeout;

use agent_dispatch::config::OrchestratorConfig;
use agent_dispatch::error::{EventLogError, ExecutorError, KnowledgeError};
use agent_dispatch::events::{EventSink, LogEvent, MemoryEventLog, kind};
use agent_dispatch::executor::{Executor, TaskAgent};
use agent_dispatch::knowledge::{KnowledgeCounts, KnowledgeSource};
use agent_dispatch::orchestrator::{Orchestrator, OrchestratorDeps, OrchestratorState};
use agent_dispatch::work::{
    NewWorkItem, OptimizationTask, Priority, WorkItem, WorkQueue, WorkStatus,
};

/// Maximum time any single wait is allowed before we consider the test hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

// ── Stubs ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    Fail,
}

/// Agent that sleeps, tracks concurrency, then succeeds or fails.
struct StubAgent {
    name: String,
    delay: Duration,
    behavior: Behavior,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
}

#[async_trait]
impl TaskAgent for StubAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, item: &WorkItem) -> Result<String, ExecutorError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.finished.fetch_add(1, Ordering::SeqCst);

        match self.behavior {
            Behavior::Succeed => Ok(format!("{} handled {}", self.name, item.description)),
            Behavior::Fail => Err(ExecutorError::Failed {
                agent: self.name.clone(),
                reason: "BuildError: compilation failed".to_string(),
            }),
        }
    }
}

struct StubExecutor {
    delay: Duration,
    behavior: Behavior,
    known_agents: Option<Vec<&'static str>>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
}

impl StubExecutor {
    fn new(delay: Duration, behavior: Behavior) -> Self {
        Self {
            delay,
            behavior,
            known_agents: None,
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            finished: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Executor for StubExecutor {
    fn resolve(&self, agent: &str) -> Result<Arc<dyn TaskAgent>, ExecutorError> {
        let known = self
            .known_agents
            .as_ref()
            .is_none_or(|names| names.iter().any(|name| *name == agent));
        if !known {
            return Err(ExecutorError::UnknownAgent {
                agent: agent.to_string(),
            });
        }
        Ok(Arc::new(StubAgent {
            name: agent.to_string(),
            delay: self.delay,
            behavior: self.behavior,
            running: Arc::clone(&self.running),
            peak: Arc::clone(&self.peak),
            finished: Arc::clone(&self.finished),
        }))
    }
}

struct StaticKnowledge(Vec<(&'static str, KnowledgeCounts)>);

#[async_trait]
impl KnowledgeSource for StaticKnowledge {
    async fn list_projects(&self) -> Result<Vec<String>, KnowledgeError> {
        Ok(self.0.iter().map(|(name, _)| name.to_string()).collect())
    }

    async fn entry_counts(&self, project: &str) -> Result<KnowledgeCounts, KnowledgeError> {
        self.0
            .iter()
            .find(|(name, _)| *name == project)
            .map(|(_, counts)| *counts)
            .ok_or_else(|| KnowledgeError::UnknownProject(project.to_string()))
    }
}

// ── Harness ─────────────────────────────────────────────────────────────

struct Harness {
    dir: TempDir,
    queue: Arc<WorkQueue>,
    log: Arc<MemoryEventLog>,
}

impl Harness {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(MemoryEventLog::new());
        let queue =
            Arc::new(WorkQueue::open(dir.path().join("work_queue.json"), log.clone()).await);
        Self { dir, queue, log }
    }

    async fn orchestrator(
        &self,
        config: OrchestratorConfig,
        executor: Arc<dyn Executor>,
        knowledge: Arc<dyn KnowledgeSource>,
    ) -> Orchestrator {
        Orchestrator::new(
            config,
            OrchestratorDeps {
                queue: Arc::clone(&self.queue),
                executor,
                knowledge,
                events: self.log.clone(),
            },
            self.dir.path().join("orchestrator_state.json"),
        )
        .await
    }
}

fn config(max_concurrent_work: usize) -> OrchestratorConfig {
    OrchestratorConfig {
        check_interval: Duration::from_millis(10),
        max_concurrent_work,
        improvement_every: 1_000,
        ..Default::default()
    }
}

fn no_knowledge() -> Arc<dyn KnowledgeSource> {
    Arc::new(StaticKnowledge(Vec::new()))
}

async fn wait_outcome(orchestrator: &mut Orchestrator) {
    let received = timeout(TEST_TIMEOUT, orchestrator.next_outcome())
        .await
        .expect("timed out waiting for a dispatch outcome");
    assert!(received, "worker pool stopped unexpectedly");
}

// ── Dispatch ────────────────────────────────────────────────────────────

#[tokio::test]
async fn completed_work_records_result_and_counter() {
    let h = Harness::new().await;
    let executor = Arc::new(StubExecutor::new(Duration::from_millis(5), Behavior::Succeed));
    let mut orchestrator = h.orchestrator(config(2), executor, no_knowledge()).await;

    let item = h.queue.add("write docs", Priority::High, None, None, None).await;
    orchestrator.tick().await;
    assert!(orchestrator.is_active(item.id));
    assert_eq!(h.queue.get(item.id).await.unwrap().status, WorkStatus::InProgress);

    wait_outcome(&mut orchestrator).await;

    let done = h.queue.get(item.id).await.unwrap();
    assert_eq!(done.status, WorkStatus::Completed);
    assert_eq!(done.assigned_agent.as_deref(), Some("orchestrator"));
    assert_eq!(done.result.as_deref(), Some("orchestrator handled write docs"));
    assert_eq!(orchestrator.active_count(), 0);
    assert_eq!(orchestrator.state().total_completed, 1);
}

#[tokio::test]
async fn pinned_agent_executes_the_item() {
    let h = Harness::new().await;
    let executor = Arc::new(StubExecutor::new(Duration::from_millis(1), Behavior::Succeed));
    let mut orchestrator = h.orchestrator(config(1), executor, no_knowledge()).await;

    let item = h
        .queue
        .add("review", Priority::Low, None, Some("reviewer".into()), None)
        .await;
    orchestrator.tick().await;
    wait_outcome(&mut orchestrator).await;

    let done = h.queue.get(item.id).await.unwrap();
    assert_eq!(done.result.as_deref(), Some("reviewer handled review"));
}

#[tokio::test]
async fn failures_retry_until_exhausted() {
    let h = Harness::new().await;
    let executor = Arc::new(StubExecutor::new(Duration::from_millis(1), Behavior::Fail));
    let mut orchestrator = h.orchestrator(config(1), executor, no_knowledge()).await;

    let item = h
        .queue
        .add_item(NewWorkItem::new("flaky build", Priority::Medium).with_max_retries(2))
        .await;

    orchestrator.tick().await;
    wait_outcome(&mut orchestrator).await;
    let retried = h.queue.get(item.id).await.unwrap();
    assert_eq!(retried.status, WorkStatus::Pending);
    assert_eq!(retried.retry_count, 1);
    assert!(retried.assigned_agent.is_none());

    orchestrator.tick().await;
    wait_outcome(&mut orchestrator).await;
    let failed = h.queue.get(item.id).await.unwrap();
    assert_eq!(failed.status, WorkStatus::Failed);
    assert_eq!(failed.retry_count, 2);
    assert!(failed.error.as_deref().unwrap().contains("BuildError"));
    assert_eq!(orchestrator.state().total_failed, 2);

    // Never picked up again.
    orchestrator.tick().await;
    assert_eq!(orchestrator.active_count(), 0);
}

#[tokio::test]
async fn unresolvable_agent_counts_as_a_failed_attempt() {
    let h = Harness::new().await;
    let mut executor = StubExecutor::new(Duration::from_millis(1), Behavior::Succeed);
    executor.known_agents = Some(vec!["orchestrator"]);
    let mut orchestrator = h.orchestrator(config(1), Arc::new(executor), no_knowledge()).await;

    let item = h
        .queue
        .add("needs a ghost", Priority::High, None, Some("ghost".into()), None)
        .await;
    orchestrator.tick().await;

    let stored = h.queue.get(item.id).await.unwrap();
    assert_eq!(stored.status, WorkStatus::Pending);
    assert_eq!(stored.retry_count, 1);
    assert!(stored.error.unwrap().contains("ghost"));
    assert_eq!(orchestrator.active_count(), 0);
    assert_eq!(orchestrator.state().total_failed, 1);
}

#[tokio::test]
async fn randomized_load_never_exceeds_concurrency_bound() {
    const MAX: usize = 3;
    let h = Harness::new().await;
    let executor = Arc::new(StubExecutor::new(Duration::from_millis(20), Behavior::Succeed));
    let peak = Arc::clone(&executor.peak);
    let finished = Arc::clone(&executor.finished);
    let mut orchestrator = h.orchestrator(config(MAX), executor, no_knowledge()).await;

    let mut rng = rand::thread_rng();
    let mut added = 0;
    for round in 0..60 {
        for _ in 0..rng.gen_range(0..3) {
            let priority = Priority::ALL[rng.gen_range(0..Priority::ALL.len())];
            h.queue
                .add(format!("job {round}-{added}"), priority, None, None, None)
                .await;
            added += 1;
        }
        orchestrator.tick().await;
        assert!(orchestrator.active_count() <= MAX);
        tokio::time::sleep(Duration::from_millis(rng.gen_range(0..10))).await;
    }

    // Drain whatever is left.
    for _ in 0..2_000 {
        if h.queue.summary().await.completed == added {
            break;
        }
        orchestrator.tick().await;
        assert!(orchestrator.active_count() <= MAX);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    assert_eq!(h.queue.summary().await.completed, added);
    assert_eq!(finished.load(Ordering::SeqCst), added);
    assert!(peak.load(Ordering::SeqCst) <= MAX);
    assert_eq!(orchestrator.state().total_completed, added as u64);
}

// ── Timeouts ────────────────────────────────────────────────────────────

/// Agent that keeps running long after the loop gave up on it.
struct Straggler {
    done: Arc<AtomicBool>,
}

#[async_trait]
impl TaskAgent for Straggler {
    fn name(&self) -> &str {
        "straggler"
    }

    async fn execute(&self, _item: &WorkItem) -> Result<String, ExecutorError> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.done.store(true, Ordering::SeqCst);
        Ok("too late".to_string())
    }
}

struct StragglerExecutor {
    done: Arc<AtomicBool>,
}

impl Executor for StragglerExecutor {
    fn resolve(&self, _agent: &str) -> Result<Arc<dyn TaskAgent>, ExecutorError> {
        Ok(Arc::new(Straggler {
            done: Arc::clone(&self.done),
        }))
    }
}

#[tokio::test]
async fn timed_out_work_is_evicted_while_execution_continues() {
    let h = Harness::new().await;
    let done = Arc::new(AtomicBool::new(false));
    let executor = Arc::new(StragglerExecutor {
        done: Arc::clone(&done),
    });
    let mut orchestrator = h
        .orchestrator(
            OrchestratorConfig {
                work_timeout: Duration::from_millis(50),
                ..config(1)
            },
            executor,
            no_knowledge(),
        )
        .await;

    let item = h.queue.add("slow", Priority::High, None, None, None).await;
    orchestrator.tick().await;
    assert_eq!(orchestrator.active_count(), 1);

    tokio::time::sleep(Duration::from_millis(120)).await;
    orchestrator.tick().await;

    assert_eq!(orchestrator.active_count(), 0);
    let evicted = h.queue.get(item.id).await.unwrap();
    assert_eq!(evicted.status, WorkStatus::Pending);
    assert_eq!(evicted.retry_count, 1);
    assert!(evicted.error.unwrap().starts_with("Timeout"));
    assert_eq!(orchestrator.state().total_failed, 1);
    assert!(!done.load(Ordering::SeqCst), "execution must not be killed");
    assert_eq!(h.log.of_type(kind::WORK_TIMED_OUT).await.len(), 1);

    // The detached execution finishes on its own; its result is never recorded.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(done.load(Ordering::SeqCst));
    let stored = h.queue.get(item.id).await.unwrap();
    assert_eq!(stored.status, WorkStatus::Pending);
    assert!(stored.result.is_none());

    // The single worker is free again.
    orchestrator.tick().await;
    assert!(orchestrator.is_active(item.id));
}

// ── Health, improvement, persistence ────────────────────────────────────

#[tokio::test]
async fn health_check_warns_about_many_failures() {
    let h = Harness::new().await;
    let executor = Arc::new(StubExecutor::new(Duration::from_millis(1), Behavior::Succeed));
    let mut orchestrator = h.orchestrator(config(1), executor, no_knowledge()).await;

    orchestrator.tick().await;
    assert!(h.log.of_type(kind::HEALTH_WARNING).await.is_empty());
    assert_eq!(h.log.of_type(kind::HEALTH_CHECK).await.len(), 1);
    assert!(orchestrator.state().last_health_check.is_some());

    for i in 0..11 {
        let item = h.queue.add(format!("doomed {i}"), Priority::Low, None, None, None).await;
        h.queue.mark_failed(item.id, "fatal", false).await.unwrap();
    }
    orchestrator.tick().await;
    assert_eq!(h.log.of_type(kind::HEALTH_WARNING).await.len(), 1);
    assert_eq!(h.log.of_type(kind::HEALTH_CHECK).await.len(), 2);
}

#[tokio::test]
async fn improvement_pass_reports_patterns_and_error_categories() {
    let h = Harness::new().await;
    seed_agent_activity(&h.log).await;

    let executor = Arc::new(StubExecutor::new(Duration::from_millis(1), Behavior::Succeed));
    let mut orchestrator = h
        .orchestrator(
            OrchestratorConfig {
                improvement_every: 2,
                ..config(1)
            },
            executor,
            no_knowledge(),
        )
        .await;

    orchestrator.tick().await;
    assert!(h.log.of_type(kind::PATTERN_DISCOVERED).await.is_empty());

    orchestrator.tick().await;
    let patterns = h.log.of_type(kind::PATTERN_DISCOVERED).await;
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].message.as_deref(), Some("search -> open -> patch"));

    let errors = h.log.of_type(kind::ERROR_PATTERNS).await;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].data["categories"][0]["category"], "RateLimit");
    assert_eq!(errors[0].data["categories"][0]["count"], 3);
}

#[tokio::test]
async fn improvement_is_skipped_at_capacity() {
    let h = Harness::new().await;
    seed_agent_activity(&h.log).await;

    let executor = Arc::new(StubExecutor::new(Duration::from_secs(60), Behavior::Succeed));
    let mut orchestrator = h
        .orchestrator(
            OrchestratorConfig {
                improvement_every: 1,
                ..config(1)
            },
            executor,
            no_knowledge(),
        )
        .await;

    // Idle: the pass runs.
    orchestrator.tick().await;
    assert_eq!(h.log.of_type(kind::PATTERN_DISCOVERED).await.len(), 1);
    assert_eq!(h.log.of_type(kind::ERROR_PATTERNS).await.len(), 1);

    // The only slot is taken by a long execution: the pass is skipped.
    h.queue.add("long haul", Priority::High, None, None, None).await;
    orchestrator.tick().await;
    assert_eq!(orchestrator.active_count(), 1);
    assert_eq!(h.log.of_type(kind::PATTERN_DISCOVERED).await.len(), 1);
    assert_eq!(h.log.of_type(kind::ERROR_PATTERNS).await.len(), 1);
    assert_eq!(h.log.of_type(kind::HEALTH_CHECK).await.len(), 2);
}

/// Event sink whose general stream cannot be read.
struct UnreadableEvents(Arc<MemoryEventLog>);

#[async_trait]
impl EventSink for UnreadableEvents {
    async fn record(&self, event: LogEvent) {
        self.0.record(event).await;
    }

    async fn recent_events(&self, _limit: usize) -> Result<Vec<LogEvent>, EventLogError> {
        Err(EventLogError::Io {
            path: "events.jsonl".into(),
            source: std::io::Error::other("disk unavailable"),
        })
    }

    async fn recent_errors(&self, limit: usize) -> Result<Vec<LogEvent>, EventLogError> {
        self.0.recent_errors(limit).await
    }
}

struct BrokenKnowledge;

#[async_trait]
impl KnowledgeSource for BrokenKnowledge {
    async fn list_projects(&self) -> Result<Vec<String>, KnowledgeError> {
        Err(KnowledgeError::UnknownProject("catalog".into()))
    }

    async fn entry_counts(&self, project: &str) -> Result<KnowledgeCounts, KnowledgeError> {
        Err(KnowledgeError::UnknownProject(project.to_string()))
    }
}

#[tokio::test]
async fn failing_improvement_steps_do_not_abort_the_tick() {
    let h = Harness::new().await;
    seed_agent_activity(&h.log).await;
    seed_completed(&h, 11).await;
    let state_path = h.dir.path().join("orchestrator_state.json");

    let executor: Arc<dyn Executor> =
        Arc::new(StubExecutor::new(Duration::from_millis(1), Behavior::Succeed));
    let mut orchestrator = Orchestrator::new(
        OrchestratorConfig {
            improvement_every: 1,
            ..config(1)
        },
        OrchestratorDeps {
            queue: Arc::clone(&h.queue),
            executor,
            knowledge: Arc::new(BrokenKnowledge),
            events: Arc::new(UnreadableEvents(Arc::clone(&h.log))),
        },
        &state_path,
    )
    .await;

    orchestrator.tick().await;

    // Pattern mining and optimization failed and were reported.
    assert!(h.log.of_type(kind::PATTERN_DISCOVERED).await.is_empty());
    let loop_errors: Vec<String> = h
        .log
        .of_type(kind::LOOP_ERROR)
        .await
        .into_iter()
        .filter_map(|e| e.message)
        .collect();
    assert_eq!(loop_errors.len(), 2);
    assert!(loop_errors[0].starts_with("pattern_mining:"));
    assert!(loop_errors[1].starts_with("optimization:"));

    // Error analysis still ran between them.
    let errors = h.log.of_type(kind::ERROR_PATTERNS).await;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].data["categories"][0]["category"], "RateLimit");
    assert!(h.queue.is_empty().await);

    // The tick carried on to persist state.
    let saved = OrchestratorState::load(&state_path).await;
    assert_eq!(saved.total_completed, 11);
    assert_eq!(saved.last_health_check, orchestrator.state().last_health_check);
    assert!(saved.last_health_check.is_some());
    assert!(orchestrator.status().borrow().running);
}

async fn seed_agent_activity(log: &MemoryEventLog) {
    for session in ["s1", "s2", "s3"] {
        for tool in ["search", "open", "patch"] {
            log.record(LogEvent::info("agent", "tool_call").with_session(session).with_tool(tool))
                .await;
        }
    }
    for _ in 0..3 {
        log.record(LogEvent::error("agent", "tool_error").with_message("RateLimit: slow down"))
            .await;
    }
}

async fn seed_completed(h: &Harness, total_completed: u64) {
    let mut state = OrchestratorState::new();
    state.total_completed = total_completed;
    state
        .save(&h.dir.path().join("orchestrator_state.json"))
        .await
        .unwrap();
}

fn optimization_tasks(items: &[WorkItem]) -> Vec<OptimizationTask> {
    items
        .iter()
        .filter_map(|item| item.context.optimization().cloned())
        .collect()
}

#[tokio::test]
async fn idle_orchestrator_generates_optimization_work() {
    let h = Harness::new().await;
    seed_completed(&h, 11).await;

    let knowledge = Arc::new(StaticKnowledge(vec![
        ("api", KnowledgeCounts { failures: 6, patterns: 0 }),
        ("web", KnowledgeCounts { failures: 0, patterns: 5 }),
    ]));
    let executor = Arc::new(StubExecutor::new(Duration::from_secs(60), Behavior::Succeed));
    let mut orchestrator = h
        .orchestrator(
            OrchestratorConfig {
                improvement_every: 1,
                ..config(1)
            },
            executor,
            knowledge,
        )
        .await;
    assert_eq!(orchestrator.state().total_completed, 11);

    orchestrator.tick().await;

    let items = h.queue.all().await;
    let tasks = optimization_tasks(&items);
    assert_eq!(tasks.len(), 2);
    let root_cause = items
        .iter()
        .find(|i| {
            matches!(
                i.context.optimization(),
                Some(OptimizationTask::RootCauseAnalysis { .. })
            )
        })
        .unwrap();
    assert_eq!(root_cause.priority, Priority::Medium);
    assert_eq!(root_cause.project.as_deref(), Some("api"));
    let consolidation = items
        .iter()
        .find(|i| {
            matches!(
                i.context.optimization(),
                Some(OptimizationTask::PatternConsolidation { .. })
            )
        })
        .unwrap();
    assert_eq!(consolidation.priority, Priority::Low);
    assert_eq!(h.log.of_type(kind::OPTIMIZATION_TASK_CREATED).await.len(), 2);
}

#[tokio::test]
async fn optimization_waits_for_enough_history() {
    let h = Harness::new().await;
    seed_completed(&h, 10).await;

    let knowledge = Arc::new(StaticKnowledge(vec![(
        "api",
        KnowledgeCounts { failures: 9, patterns: 9 },
    )]));
    let executor = Arc::new(StubExecutor::new(Duration::from_millis(1), Behavior::Succeed));
    let mut orchestrator = h
        .orchestrator(
            OrchestratorConfig {
                improvement_every: 1,
                ..config(1)
            },
            executor,
            knowledge,
        )
        .await;

    orchestrator.tick().await;
    assert!(h.queue.is_empty().await);
}

#[tokio::test]
async fn counters_survive_a_restart() {
    let h = Harness::new().await;
    let executor = Arc::new(StubExecutor::new(Duration::from_millis(1), Behavior::Succeed));
    let mut first = h.orchestrator(config(1), executor.clone(), no_knowledge()).await;

    let item = h.queue.add("persist me", Priority::Medium, None, None, None).await;
    first.tick().await;
    wait_outcome(&mut first).await;
    first.tick().await;
    let first_started = first.state().started_at;
    drop(first);

    let second = h.orchestrator(config(1), executor, no_knowledge()).await;
    assert_eq!(second.state().total_completed, 1);
    assert!(second.state().last_health_check.is_some());
    assert!(second.state().started_at >= first_started);

    let reloaded = WorkQueue::open(h.queue.path(), h.log.clone()).await;
    assert_eq!(reloaded.get(item.id).await.unwrap().status, WorkStatus::Completed);
}

#[tokio::test]
async fn run_processes_work_until_shutdown() {
    let h = Harness::new().await;
    let executor = Arc::new(StubExecutor::new(Duration::from_millis(5), Behavior::Succeed));
    let orchestrator = h.orchestrator(config(2), executor, no_knowledge()).await;
    let mut status = orchestrator.status();

    let ids = [
        h.queue.add("one", Priority::Low, None, None, None).await.id,
        h.queue.add("two", Priority::High, None, None, None).await.id,
    ];

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn(orchestrator.run(async {
        stop_rx.await.ok();
    }));

    timeout(TEST_TIMEOUT, async {
        loop {
            if h.queue.summary().await.completed == ids.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("work was not completed");

    stop_tx.send(()).unwrap();
    let state = timeout(TEST_TIMEOUT, handle).await.unwrap().unwrap();
    assert_eq!(state.total_completed, 2);

    let last = status.borrow_and_update().clone();
    assert!(!last.running);
    assert_eq!(last.total_completed, 2);
    assert!(last.active.is_empty());

    let saved = OrchestratorState::load(&h.dir.path().join("orchestrator_state.json")).await;
    assert_eq!(saved.total_completed, 2);
}
