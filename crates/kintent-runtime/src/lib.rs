//! # kintent-runtime
//!
//! Execution side of kintent:
//!
//! - [`ReconcileExecutor`]: applies approved change sets with bounded retry
//!   and compensating rollback, auditing every execution
//! - [`Reconciler`]: the compile, plan, evaluate, execute pipeline with
//!   conflict refresh
//! - [`MemoryCluster`]: an in-process cluster for tests and dry runs
//! - [`retry`]: backoff policy and cancellation

pub mod executor;
pub mod memory;
pub mod reconciler;
pub mod retry;

pub use executor::{ExecuteError, ExecuteOptions, ReconcileExecutor, ReconcileOutcome};
pub use memory::{Fault, MemoryCluster};
pub use reconciler::{
    AttemptReport, Preview, ReconcileError, ReconcileOptions, ReconcileReport, Reconciler,
};
pub use retry::{RetryPolicy, StopReason, StopSignal};
