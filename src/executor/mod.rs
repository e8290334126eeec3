//! Execution seam.
//!
//! The core never knows how an agent identity turns into behavior. It asks
//! an [`Executor`] to resolve the identity and then runs the item through
//! the returned [`TaskAgent`].

pub mod command;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ExecutorError;
use crate::work::WorkItem;

pub use command::CommandExecutor;

/// Something that can carry out a work item.
#[async_trait]
pub trait TaskAgent: Send + Sync {
    /// Identity this agent was resolved from.
    fn name(&self) -> &str;

    /// Run the item to completion, returning its result text.
    async fn execute(&self, item: &WorkItem) -> Result<String, ExecutorError>;
}

/// Resolves agent identities into runnable agents.
pub trait Executor: Send + Sync {
    fn resolve(&self, agent: &str) -> Result<Arc<dyn TaskAgent>, ExecutorError>;
}
