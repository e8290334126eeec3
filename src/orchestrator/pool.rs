//! Fixed pool of dispatch workers.
//!
//! Workers pull [`Dispatch`]es from a bounded channel and report exactly one
//! [`DispatchOutcome`] per dispatch on the results channel, unless the loop
//! abandons the dispatch first. Each execution runs in its own task so an
//! abandoned execution keeps running detached while its worker moves on.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ExecutorError;
use crate::executor::TaskAgent;
use crate::work::WorkItem;

/// One execution handed to the pool.
pub(crate) struct Dispatch {
    /// Token tying the eventual outcome to this attempt.
    pub dispatch_id: Uuid,
    pub item: WorkItem,
    pub agent: Arc<dyn TaskAgent>,
    /// Fires (or closes) when the loop gives up on this attempt.
    pub abandon: oneshot::Receiver<()>,
}

/// Result of one dispatch.
#[derive(Debug)]
pub(crate) struct DispatchOutcome {
    pub work_id: Uuid,
    pub dispatch_id: Uuid,
    pub result: Result<String, ExecutorError>,
}

pub(crate) struct WorkerPool {
    tx: mpsc::Sender<Dispatch>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers reporting to `results`.
    pub fn spawn(size: usize, results: mpsc::UnboundedSender<DispatchOutcome>) -> Self {
        let size = size.max(1);
        let (tx, rx) = mpsc::channel(size);
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..size)
            .map(|worker| tokio::spawn(run_worker(worker, Arc::clone(&rx), results.clone())))
            .collect();

        Self { tx, workers }
    }

    /// Queue a dispatch for the next free worker.
    ///
    /// Hands the dispatch back if the pool has shut down.
    pub async fn dispatch(&self, dispatch: Dispatch) -> Result<(), Box<Dispatch>> {
        self.tx.send(dispatch).await.map_err(|e| Box::new(e.0))
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }
}

async fn run_worker(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<Dispatch>>>,
    results: mpsc::UnboundedSender<DispatchOutcome>,
) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(Dispatch {
            dispatch_id,
            item,
            agent,
            abandon,
        }) = next
        else {
            debug!(worker, "Dispatch channel closed, worker exiting");
            return;
        };

        let work_id = item.id;
        debug!(worker, work_id = %work_id, agent = agent.name(), "Executing work item");

        let mut execution = tokio::spawn(async move { agent.execute(&item).await });

        let result = tokio::select! {
            joined = &mut execution => match joined {
                Ok(result) => result,
                Err(e) => Err(ExecutorError::Panicked { reason: e.to_string() }),
            },
            _ = abandon => {
                debug!(worker, work_id = %work_id, "Abandoned execution, leaving it detached");
                continue;
            }
        };

        if results
            .send(DispatchOutcome {
                work_id,
                dispatch_id,
                result,
            })
            .is_err()
        {
            warn!(worker, work_id = %work_id, "Results channel closed, dropping outcome");
            return;
        }
    }
}
