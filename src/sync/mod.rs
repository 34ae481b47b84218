//! Offline-first request path and coordinated refresh.

mod adapter;
mod orchestrator;

pub use adapter::{DataSource, FetchOutcome, RequestAdapter, RetryPolicy};
pub use orchestrator::{CycleOutcome, CycleReport, RefreshOrchestrator, RefreshTrigger};
