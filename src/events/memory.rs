//! In-process event log with bounded history.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{EventSink, LogEvent, trace};
use crate::error::EventLogError;

/// Default number of entries kept per stream.
const DEFAULT_CAPACITY: usize = 1000;

/// Keeps the most recent events in memory.
pub struct MemoryEventLog {
    events: RwLock<VecDeque<LogEvent>>,
    errors: RwLock<VecDeque<LogEvent>>,
    capacity: usize,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::new()),
            errors: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// All retained general events of a given type, oldest first.
    pub async fn of_type(&self, event_type: &str) -> Vec<LogEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    fn push(buf: &mut VecDeque<LogEvent>, event: LogEvent, capacity: usize) {
        buf.push_back(event);
        while buf.len() > capacity {
            buf.pop_front();
        }
    }

    fn tail(buf: &VecDeque<LogEvent>, limit: usize) -> Vec<LogEvent> {
        let skip = buf.len().saturating_sub(limit);
        buf.iter().skip(skip).cloned().collect()
    }
}

impl Default for MemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for MemoryEventLog {
    async fn record(&self, event: LogEvent) {
        trace(&event);
        if event.is_error() {
            Self::push(&mut *self.errors.write().await, event.clone(), self.capacity);
        }
        Self::push(&mut *self.events.write().await, event, self.capacity);
    }

    async fn recent_events(&self, limit: usize) -> Result<Vec<LogEvent>, EventLogError> {
        Ok(Self::tail(&*self.events.read().await, limit))
    }

    async fn recent_errors(&self, limit: usize) -> Result<Vec<LogEvent>, EventLogError> {
        Ok(Self::tail(&*self.errors.read().await, limit))
    }
}
