//! Agent Dispatch: a durable priority work queue and bounded-concurrency orchestrator.

pub mod api;
pub mod config;
pub mod document;
pub mod error;
pub mod events;
pub mod executor;
pub mod knowledge;
pub mod orchestrator;
pub mod work;
