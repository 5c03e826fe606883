//!
//! Worker factory
//!
//! A pluggable trait: anything that can spawn and terminate an opaque,
//! reusable resource (a subprocess, a database connection, a network
//! session) can back a pool.
//!
use crate::errors::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;

/// Opaque identity for a live worker, assigned by the Coordinator at spawn
/// time (never by the factory itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
impl WorkerId {
    pub(crate) fn for_test(value: u64) -> Self {
        Self(value)
    }
}

#[derive(Default)]
pub(crate) struct WorkerIdGen(AtomicU64);

impl WorkerIdGen {
    pub(crate) fn next(&self) -> WorkerId {
        WorkerId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// Why a worker (or consumer) terminated.
///
/// `Normal` maps to a `return(ok)`-equivalent outcome; anything else is
/// treated as a crash and maps to `return(fail)`.
#[derive(Debug, Clone)]
pub enum ExitReason {
    Normal,
    Abnormal(String),
}

impl ExitReason {
    pub fn is_normal(&self) -> bool {
        matches!(self, ExitReason::Normal)
    }
}

/// A freshly spawned worker, along with a one-shot notification the
/// Coordinator awaits to learn when the worker terminates on its own
/// (crash or unsupervised exit).
///
/// This is the Rust stand-in for process-linking: a small adapter (here,
/// whatever produced `exited`) notifies the Coordinator exactly once.
pub struct Spawned<W> {
    pub worker: W,
    pub exited: oneshot::Receiver<ExitReason>,
}

/// Spawns and terminates the opaque worker resource for one pool.
///
/// Implementors own whatever supervision mechanism is appropriate for
/// their resource kind; the Coordinator only requires that `spawn` either
/// returns a worker that will eventually signal `exited`, or fails
/// immediately, and that `terminate` is eventually effective.
#[async_trait]
pub trait WorkerFactory: Send + Sync + 'static {
    /// The resource handed out to consumers between a successful take and
    /// its matching return.
    type Worker: Send + 'static;

    /// Called once when a pool is registered, before any worker is
    /// spawned for it. The default is a no-op; implementations that need
    /// a per-pool template (a command line, a connection string)
    /// validate or cache it here.
    async fn prepare(&self, _pool: &str, _descriptor: &serde_json::Value) -> Result<()> {
        Ok(())
    }

    /// Spawn a worker for the pool described by `descriptor` (the pool's
    /// `factory_descriptor`, a.k.a. `start_mfa`).
    async fn spawn(&self, pool: &str, descriptor: &serde_json::Value) -> Result<Spawned<Self::Worker>>;

    /// Terminate a previously spawned worker. Implementations should be
    /// tolerant of a worker that is already dead.
    async fn terminate(&self, pool: &str, worker: Self::Worker);
}

/// A reference [`WorkerFactory`] that spawns real child processes.
///
/// The `factory_descriptor` is expected to be a JSON object of the shape
/// `{"program": "...", "args": [...]}`; `program` defaults to the value of
/// the `RESPOOL_WORKER_EXEC` environment variable (or `"true"` if unset,
/// letting the pool exercise demo configs without any external program).
pub mod process {
    use super::*;
    use std::process::Stdio;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::process::{Child, Command};

    pub struct ProcessWorker {
        pub(crate) child: Arc<tokio::sync::Mutex<Child>>,
    }

    #[derive(Default)]
    pub struct ProcessFactory;

    const POLL_INTERVAL: Duration = Duration::from_millis(200);

    fn descriptor_command(descriptor: &serde_json::Value) -> Command {
        let program = descriptor
            .get("program")
            .and_then(|v| v.as_str())
            .map(String::from)
            .or_else(|| std::env::var("RESPOOL_WORKER_EXEC").ok())
            .unwrap_or_else(|| "true".to_string());
        let mut command = Command::new(program);
        if let Some(args) = descriptor.get("args").and_then(|v| v.as_array()) {
            for arg in args {
                if let Some(s) = arg.as_str() {
                    command.arg(s);
                }
            }
        }
        command
            .env("CONF_LOGGING__LEVEL", crate::config::get_log_level())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true);
        command
    }

    #[async_trait]
    impl WorkerFactory for ProcessFactory {
        type Worker = ProcessWorker;

        async fn spawn(
            &self,
            pool: &str,
            descriptor: &serde_json::Value,
        ) -> Result<Spawned<Self::Worker>> {
            let child = descriptor_command(descriptor)
                .spawn()
                .map_err(|err| crate::errors::Error::FactoryError(err.to_string()))?;
            let child = Arc::new(tokio::sync::Mutex::new(child));

            let (tx, rx) = oneshot::channel();
            let pool = pool.to_string();
            let watched = child.clone();
            tokio::spawn(async move {
                let reason = loop {
                    let mut guard = watched.lock().await;
                    match guard.try_wait() {
                        Ok(Some(status)) if status.success() => break ExitReason::Normal,
                        Ok(Some(status)) => {
                            break ExitReason::Abnormal(format!(
                                "pool '{pool}' worker exited with {status}"
                            ))
                        }
                        Ok(None) => {
                            drop(guard);
                            tokio::time::sleep(POLL_INTERVAL).await;
                        }
                        Err(err) => break ExitReason::Abnormal(err.to_string()),
                    }
                };
                let _ = tx.send(reason);
            });

            Ok(Spawned {
                worker: ProcessWorker { child },
                exited: rx,
            })
        }

        async fn terminate(&self, _pool: &str, worker: Self::Worker) {
            let mut guard = worker.child.lock().await;
            let _ = guard.start_kill();
            let _ = guard.wait().await;
        }
    }
}

/// A hermetic, in-memory [`WorkerFactory`] with no external process or
/// network dependency, used by the crate's own test suite and by the
/// `respoold` demo binary. Every spawned worker carries a `kill()` method
/// a test can call to simulate a crash, firing the same `exited`
/// notification a real supervised resource would on an unsupervised
/// death.
pub mod memory {
    use super::*;
    use std::sync::atomic::AtomicU64;

    pub struct MemoryWorker {
        id: u64,
        kill_tx: Option<oneshot::Sender<ExitReason>>,
    }

    impl MemoryWorker {
        pub fn id(&self) -> u64 {
            self.id
        }

        /// Simulate a crash: notifies the Coordinator's watcher task the
        /// same way a real supervised worker's unsupervised death would.
        pub fn kill(&mut self, reason: impl Into<String>) {
            if let Some(tx) = self.kill_tx.take() {
                let _ = tx.send(ExitReason::Abnormal(reason.into()));
            }
        }
    }

    #[derive(Default)]
    pub struct MemoryFactory {
        next_id: AtomicU64,
    }

    #[async_trait]
    impl WorkerFactory for MemoryFactory {
        type Worker = MemoryWorker;

        async fn spawn(&self, pool: &str, _descriptor: &serde_json::Value) -> Result<Spawned<Self::Worker>> {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let (tx, rx) = oneshot::channel();
            log::trace!("pool '{pool}': spawned in-memory worker {id}");
            Ok(Spawned {
                worker: MemoryWorker {
                    id,
                    kill_tx: Some(tx),
                },
                exited: rx,
            })
        }

        async fn terminate(&self, pool: &str, worker: Self::Worker) {
            log::trace!("pool '{pool}': terminated in-memory worker {}", worker.id);
        }
    }
}
