//! A generic, async worker-process pool coordinator.
//!
//! One [`coordinator`] task owns every named pool and serializes every
//! take/return/add/remove request through its mailbox: linearizable
//! pool-state transitions without locking the state itself. Consumers
//! talk to it only through the cloneable [`CoordinatorHandle`].

pub mod config;
pub mod errors;
pub mod factory;
pub mod handle;
pub mod metrics;
pub mod status;

mod coordinator;
mod registry;

pub use coordinator::spawn;
pub use errors::{Error, Result};
pub use factory::{ExitReason, Spawned, WorkerFactory, WorkerId};
pub use handle::{ConsumerId, ConsumerSession, CoordinatorHandle, ReturnStatus, ScopedWorker};
pub use metrics::{LogSink, MetricKind, MetricsSink, NullSink};
pub use status::{PoolStats, Report};

#[cfg(test)]
mod tests;
