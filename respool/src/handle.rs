//!
//! Client-facing handle to the Coordinator
//!
//! `CoordinatorHandle` is the cheap, cloneable client side consumers use to
//! call `.take_named()`/`.take_any()`, and `ScopedWorker` is the RAII guard
//! that always sends a `return` on scope exit.
//!
use crate::coordinator::Command;
use crate::errors::{Error, Result};
use crate::factory::{ExitReason, WorkerFactory, WorkerId};
use crate::status::Report;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Opaque identity of a consumer holding one or more workers. Never
/// constructed by callers directly; obtained from [`CoordinatorHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(pub(crate) u64);

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
impl ConsumerId {
    pub(crate) fn for_test(value: u64) -> Self {
        Self(value)
    }
}

/// Whether a returned worker should go back to the free list or be
/// destroyed and replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnStatus {
    Ok,
    Fail,
}

pub(crate) struct Inner<F: WorkerFactory> {
    pub(crate) cmd_tx: mpsc::UnboundedSender<Command<F>>,
    pub(crate) next_consumer: AtomicU64,
}

/// The cloneable client side of a running Coordinator.
///
/// Every operation is a message sent down the Coordinator's mailbox;
/// synchronous operations bundle a `oneshot` reply slot, `return` is
/// fire-and-forget.
pub struct CoordinatorHandle<F: WorkerFactory> {
    pub(crate) inner: Arc<Inner<F>>,
}

impl<F: WorkerFactory> Clone for CoordinatorHandle<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F: WorkerFactory> CoordinatorHandle<F> {
    fn send(&self, cmd: Command<F>) -> Result<()> {
        self.inner.cmd_tx.send(cmd).map_err(|_| Error::Closed)
    }

    fn next_consumer_id(&self) -> ConsumerId {
        ConsumerId(self.inner.next_consumer.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a new pool. Fails with `duplicate_pool_name` if a pool of
    /// that name already exists.
    pub async fn add_pool(&self, config: crate::config::PoolConfig) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::AddPool { config, reply })?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Register a batch of pools, in order. Stops at the first failure.
    pub async fn add_pools(&self, configs: Vec<crate::config::PoolConfig>) -> Result<()> {
        for config in configs {
            self.add_pool(config).await?;
        }
        Ok(())
    }

    /// Take a worker from whichever pool the selection strategies resolve
    /// to, wrapped in a single-use [`ScopedWorker`] that returns itself on
    /// drop.
    pub async fn take_any(&self) -> Result<ScopedWorker<F>> {
        let consumer = self.next_consumer_id();
        let (reply, rx) = oneshot::channel();
        self.send(Command::TakeAny { consumer, reply })?;
        let (id, worker) = rx.await.map_err(|_| Error::Closed)??;
        Ok(ScopedWorker::new(self.clone(), id, consumer, worker))
    }

    /// Take a worker from a specific named pool.
    pub async fn take_named(&self, pool: &str) -> Result<ScopedWorker<F>> {
        let consumer = self.next_consumer_id();
        let (reply, rx) = oneshot::channel();
        self.send(Command::TakeNamed {
            pool: pool.to_string(),
            consumer,
            reply,
        })?;
        let (id, worker) = rx.await.map_err(|_| Error::Closed)??;
        Ok(ScopedWorker::new(self.clone(), id, consumer, worker))
    }

    /// Open a multi-worker consumer session: a stable identity a caller
    /// can take several workers under, and whose abnormal end (a real
    /// panic, or an explicit [`ConsumerSession::crash`]) reclaims every
    /// worker it still holds.
    pub fn consumer(&self) -> ConsumerSession<F> {
        let id = self.next_consumer_id();
        let (exit_tx, exit_rx) = oneshot::channel();
        let cmd_tx = self.inner.cmd_tx.clone();
        tokio::spawn(async move {
            if let Ok(reason) = exit_rx.await {
                let _ = cmd_tx.send(Command::ConsumerExited { consumer: id, reason });
            }
        });
        ConsumerSession {
            id,
            handle: self.clone(),
            exit_tx: Some(exit_tx),
        }
    }

    /// A formatted snapshot of every pool's population.
    pub async fn stats(&self) -> Result<Report> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::PoolStats { reply })?;
        rx.await.map_err(|_| Error::Closed)
    }

    /// Ask the Coordinator to stop. In-flight requests drain before this
    /// resolves.
    pub async fn stop(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stop { reply })?;
        rx.await.map_err(|_| Error::Closed)
    }

    pub(crate) fn return_worker(&self, id: WorkerId, consumer: ConsumerId, status: ReturnStatus, worker: F::Worker) {
        let _ = self.send(Command::Return {
            id,
            consumer,
            status,
            worker,
        });
    }
}

/// A multi-worker consumer identity. Low-level: callers manage each
/// lease's return/fail explicitly, then either let the session drop
/// normally or call [`ConsumerSession::crash`] to simulate an abnormal
/// exit while workers are still outstanding.
pub struct ConsumerSession<F: WorkerFactory> {
    id: ConsumerId,
    handle: CoordinatorHandle<F>,
    exit_tx: Option<oneshot::Sender<ExitReason>>,
}

impl<F: WorkerFactory> ConsumerSession<F> {
    pub fn id(&self) -> ConsumerId {
        self.id
    }

    pub async fn take_any(&self) -> Result<(WorkerId, F::Worker)> {
        let (reply, rx) = oneshot::channel();
        self.handle
            .send(Command::TakeAny {
                consumer: self.id,
                reply,
            })
            .map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)?
    }

    pub async fn take_named(&self, pool: &str) -> Result<(WorkerId, F::Worker)> {
        let (reply, rx) = oneshot::channel();
        self.handle
            .send(Command::TakeNamed {
                pool: pool.to_string(),
                consumer: self.id,
                reply,
            })
            .map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)?
    }

    pub fn return_ok(&self, id: WorkerId, worker: F::Worker) {
        self.handle.return_worker(id, self.id, ReturnStatus::Ok, worker);
    }

    pub fn return_fail(&self, id: WorkerId, worker: F::Worker) {
        self.handle.return_worker(id, self.id, ReturnStatus::Fail, worker);
    }

    /// Consume the session and notify the Coordinator that it ended
    /// abnormally: every worker it still holds is removed and replaced,
    /// exactly as if the consumer process had crashed.
    pub fn crash(mut self, reason: impl Into<String>) {
        if let Some(tx) = self.exit_tx.take() {
            let _ = tx.send(ExitReason::Abnormal(reason.into()));
        }
    }
}

impl<F: WorkerFactory> Drop for ConsumerSession<F> {
    fn drop(&mut self) {
        if let Some(tx) = self.exit_tx.take() {
            let reason = if std::thread::panicking() {
                ExitReason::Abnormal("panic while holding a consumer session".to_string())
            } else {
                ExitReason::Normal
            };
            let _ = tx.send(reason);
        }
    }
}

/// RAII guard around a single checked-out worker. Derefs to the worker
/// resource; on drop it sends `return(ok)` unless [`ScopedWorker::fail`]
/// was called first, in which case it sends `return(fail)`.
pub struct ScopedWorker<F: WorkerFactory> {
    handle: CoordinatorHandle<F>,
    id: WorkerId,
    consumer: ConsumerId,
    worker: Option<F::Worker>,
    failed: bool,
}

impl<F: WorkerFactory> std::fmt::Debug for ScopedWorker<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedWorker")
            .field("id", &self.id)
            .field("consumer", &self.consumer)
            .field("failed", &self.failed)
            .finish()
    }
}

impl<F: WorkerFactory> ScopedWorker<F> {
    fn new(handle: CoordinatorHandle<F>, id: WorkerId, consumer: ConsumerId, worker: F::Worker) -> Self {
        Self {
            handle,
            id,
            consumer,
            worker: Some(worker),
            failed: false,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Mark this worker for destruction instead of being returned to the
    /// free list — e.g. the caller observed it misbehave.
    pub fn fail(&mut self) {
        self.failed = true;
    }
}

impl<F: WorkerFactory> Deref for ScopedWorker<F> {
    type Target = F::Worker;

    fn deref(&self) -> &Self::Target {
        self.worker.as_ref().expect("worker taken before drop")
    }
}

impl<F: WorkerFactory> DerefMut for ScopedWorker<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.worker.as_mut().expect("worker taken before drop")
    }
}

impl<F: WorkerFactory> Drop for ScopedWorker<F> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let status = if self.failed { ReturnStatus::Fail } else { ReturnStatus::Ok };
            self.handle.return_worker(self.id, self.consumer, status, worker);
        }
    }
}
