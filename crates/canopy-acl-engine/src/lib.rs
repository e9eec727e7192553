//! # Canopy ACL Engine
//!
//! The cache maintenance engine: the asynchronous half of the permission
//! system. Mutation code paths enqueue small, self-describing operations;
//! a pool of workers executes them as idempotent recomputations against
//! current persisted state, converging the materialized permission cache.
//!
//! ## Key Types
//!
//! - [`MaintenanceEngine`] - executes [`MaintenanceOp`]s against a backend
//! - [`OpOutcome`] - `Applied`, or `Skipped` on a benign race
//! - [`TaskQueue`] / [`MemoryQueue`] - the queue seam and its in-process impl
//! - [`WorkerPool`] / [`WorkerConfig`] - the worker tasks and retry policy
//!
//! ## Consistency model
//!
//! No ordering is guaranteed between operations, even for the same node.
//! Jobs are not snapshotted: a worker always reads state at execution
//! time, so a stale job recomputes an already-correct answer rather than
//! regressing it. Missing targets are successes, not failures.
//!
//! [`MaintenanceOp`]: canopy_acl_core::MaintenanceOp

pub mod engine;
pub mod error;
pub mod queue;
pub mod worker;

pub use engine::{MaintenanceEngine, OpOutcome};
pub use error::{EngineError, Result};
pub use queue::{Job, MemoryQueue, TaskQueue};
pub use worker::{WorkerConfig, WorkerPool};
