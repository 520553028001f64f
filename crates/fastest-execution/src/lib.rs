//! The execution layer: turns a resolved set of tests into results.
//!
//! [`strategy`] picks how much parallelism a run needs, [`ipc`] defines the
//! wire protocol worker subprocesses speak, [`worker_pool`] owns those
//! subprocesses, [`executor`] is the boundary a worker calls into a real
//! language adapter through, and [`scheduler`] ties all four together:
//! resolve fixture plans, batch, dispatch, track scope teardown.

pub mod error;
pub mod executor;
pub mod ipc;
pub mod scheduler;
pub mod strategy;
pub mod worker_pool;

pub use error::{ExecutionError, Result};
pub use executor::{ReferenceExecutor, TestExecutor};
pub use ipc::{HostMessage, WireUnit, WorkerMessage};
pub use scheduler::{is_successful, Scheduler, SchedulerConfig};
pub use strategy::{Strategy, StrategySelector, StrategyThresholds};
pub use worker_pool::{PoolResult, WorkerPool};
