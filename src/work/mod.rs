//! Work items and the durable queue that orders them.

pub mod model;
pub mod queue;

pub use model::{
    DEFAULT_MAX_RETRIES, NewWorkItem, OptimizationTask, Priority, WorkContext, WorkItem,
    WorkStatus,
};
pub use queue::{QueueSummary, WorkQueue};
