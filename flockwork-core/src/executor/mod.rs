//! Top-level driver: consumes a plan, orchestrates B–F, enforces the
//! concurrency cap, emits events (§4.E).

mod scheduler;

pub use scheduler::{BatchResult, ExecutionSummary, ExecutorStatus, ParallelExecutor};
