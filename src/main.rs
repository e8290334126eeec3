use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use agent_dispatch::api::api_routes;
use agent_dispatch::config::DispatchConfig;
use agent_dispatch::events::{EventSink, JsonlEventLog};
use agent_dispatch::executor::{CommandExecutor, Executor};
use agent_dispatch::knowledge::{JsonKnowledgeStore, KnowledgeSource};
use agent_dispatch::orchestrator::{Orchestrator, OrchestratorDeps};
use agent_dispatch::work::WorkQueue;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = DispatchConfig::from_env().context("Invalid configuration")?;

    // Console plus a daily rolling file under <data_dir>/logs
    let file_appender = tracing_appender::rolling::daily(config.log_dir(), "agent-dispatch.log");
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .with(fmt::layer().with_target(false).with_ansi(false).with_writer(file_writer))
        .init();

    let executor: Arc<dyn Executor> = Arc::new(
        CommandExecutor::from_config(
            config.executor_command.clone(),
            config.agent_commands.clone(),
        )
        .context("No executor command configured")?,
    );

    eprintln!("Agent Dispatch v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Data: {}", config.data_dir.display());
    eprintln!(
        "   Concurrency: {} (timeout {}s)",
        config.orchestrator.max_concurrent_work,
        config.orchestrator.work_timeout.as_secs()
    );

    // ── Stores ───────────────────────────────────────────────────────────
    let events: Arc<dyn EventSink> = Arc::new(
        JsonlEventLog::open(config.log_dir())
            .await
            .context("Failed to open event log")?,
    );
    let queue = Arc::new(WorkQueue::open(config.queue_path(), Arc::clone(&events)).await);
    let knowledge: Arc<dyn KnowledgeSource> =
        Arc::new(JsonKnowledgeStore::new(config.knowledge_path()));

    let pruned = queue.prune(config.prune_after_hours).await;
    tracing::info!(
        items = queue.len().await,
        pending = queue.pending_count().await,
        pruned,
        "Work queue ready"
    );

    // ── Orchestrator ─────────────────────────────────────────────────────
    let orchestrator = Orchestrator::new(
        config.orchestrator.clone(),
        OrchestratorDeps {
            queue: Arc::clone(&queue),
            executor,
            knowledge,
            events,
        },
        config.state_path(),
    )
    .await;

    // ── HTTP API ─────────────────────────────────────────────────────────
    if let Some(port) = config.api_port {
        let app = api_routes(Arc::clone(&queue), orchestrator.status());
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("Failed to bind API port {port}"))?;
        eprintln!("   API: http://0.0.0.0:{port}/api/work");
        tokio::spawn(async move {
            tracing::info!(port, "HTTP API started");
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "HTTP API stopped");
            }
        });
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    let state = orchestrator.run(shutdown).await;
    tracing::info!(
        completed = state.total_completed,
        failed = state.total_failed,
        "Orchestrator stopped"
    );

    Ok(())
}
