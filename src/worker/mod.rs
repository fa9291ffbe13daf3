//! Worker system — execution units and their supervising pool.
//!
//! Core components:
//! - `unit` — the per-slot execution state machine (claim → health check →
//!   context → subprocess streaming → terminal transition)
//! - `pool` — unit lifecycles, cancellation, and failure isolation

pub mod pool;
pub mod unit;

pub use pool::WorkerPool;
pub use unit::{ExecutionUnit, Outcome, UnitDeps};
