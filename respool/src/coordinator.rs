//!
//! The Coordinator: single serialized decision authority over every pool.
//!
//! One `tokio::task` owns a [`Registry`] exclusively and drains an
//! `mpsc::UnboundedReceiver<Command>` to completion, one message at a
//! time: an actor mailbox instead of a lock, needed because state here
//! spans many named pools plus two reverse indices.
//!
use crate::config::PoolConfig;
use crate::errors::{Error, Result};
use crate::factory::{ExitReason, WorkerFactory, WorkerId, WorkerIdGen};
use crate::handle::{ConsumerId, CoordinatorHandle, ReturnStatus};
use crate::metrics::{Metrics, MetricsSink};
use crate::registry::{FreeWorker, Holder, MemberRecord, Registry};
use crate::status::Report;
use rand::Rng;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

pub(crate) enum Command<F: WorkerFactory> {
    AddPool {
        config: PoolConfig,
        reply: oneshot::Sender<Result<()>>,
    },
    TakeAny {
        consumer: ConsumerId,
        reply: oneshot::Sender<Result<(WorkerId, F::Worker)>>,
    },
    TakeNamed {
        pool: String,
        consumer: ConsumerId,
        reply: oneshot::Sender<Result<(WorkerId, F::Worker)>>,
    },
    Return {
        id: WorkerId,
        consumer: ConsumerId,
        status: ReturnStatus,
        worker: F::Worker,
    },
    PoolStats {
        reply: oneshot::Sender<Report>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    WorkerExited {
        id: WorkerId,
        reason: ExitReason,
    },
    ConsumerExited {
        consumer: ConsumerId,
        reason: ExitReason,
    },
    CullTick {
        pool: String,
    },
}

/// Outcome of a grow attempt. `MaxCountReached` is an internal-only
/// capacity signal, never surfaced to a `take` caller directly — callers
/// only ever see the resulting `error_no_members`.
enum GrowOutcome {
    Grew(usize),
    MaxCountReached,
}

struct Coordinator<F: WorkerFactory> {
    registry: Registry<F::Worker>,
    factory: Arc<F>,
    metrics: Metrics,
    id_gen: WorkerIdGen,
    cmd_tx: mpsc::UnboundedSender<Command<F>>,
    cmd_rx: mpsc::UnboundedReceiver<Command<F>>,
}

/// Spawn the Coordinator task and return the cloneable client handle.
///
/// `factory` spawns/terminates the opaque worker resource; `sink`, if
/// given, receives every counter/histogram event the Coordinator emits.
pub fn spawn<F: WorkerFactory>(
    factory: F,
    sink: Option<Arc<dyn MetricsSink>>,
) -> CoordinatorHandle<F> {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let coordinator = Coordinator {
        registry: Registry::default(),
        factory: Arc::new(factory),
        metrics: Metrics::new(sink),
        id_gen: WorkerIdGen::default(),
        cmd_tx: cmd_tx.clone(),
        cmd_rx,
    };
    tokio::spawn(coordinator.run());
    CoordinatorHandle {
        inner: Arc::new(crate::handle::Inner {
            cmd_tx,
            next_consumer: AtomicU64::new(0),
        }),
    }
}

impl<F: WorkerFactory> Coordinator<F> {
    async fn run(mut self) {
        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                Command::AddPool { config, reply } => {
                    let _ = reply.send(self.add_pool(config).await);
                }
                Command::TakeAny { consumer, reply } => {
                    let _ = reply.send(self.take_any(consumer).await);
                }
                Command::TakeNamed { pool, consumer, reply } => {
                    let _ = reply.send(self.take_named(&pool, consumer).await);
                }
                Command::Return {
                    id,
                    consumer,
                    status,
                    worker,
                } => {
                    self.handle_return(id, consumer, status, worker).await;
                }
                Command::PoolStats { reply } => {
                    let _ = reply.send(Report::new(&self.registry));
                }
                Command::Stop { reply } => {
                    let _ = reply.send(());
                    break;
                }
                Command::WorkerExited { id, reason } => {
                    self.on_worker_exited(id, reason).await;
                }
                Command::ConsumerExited { consumer, reason } => {
                    self.on_consumer_exited(consumer, reason).await;
                }
                Command::CullTick { pool } => {
                    self.on_cull_tick(&pool).await;
                }
            }
        }
        log::debug!("coordinator stopped");
    }

    /// Registers a new named pool and grows it to its initial count.
    async fn add_pool(&mut self, config: PoolConfig) -> Result<()> {
        if self.registry.pools.contains_key(&config.name) {
            return Err(Error::DuplicatePoolName(config.name));
        }
        let name = config.name.clone();
        let init_count = config.init_count;
        let cull_interval = config.cull_interval.as_duration();
        self.factory.prepare(&name, &config.factory_descriptor).await?;
        self.registry
            .pools
            .insert(name.clone(), crate::registry::Pool::new(config));
        self.registry.selector.push(name.clone());

        if !cull_interval.is_zero() {
            self.schedule_cull(name.clone(), cull_interval);
        }

        self.grow(&name, init_count).await?;
        Ok(())
    }

    fn schedule_cull(&self, pool: String, interval: std::time::Duration) {
        let cmd_tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let _ = cmd_tx.send(Command::CullTick { pool });
        });
    }

    /// Spawns up to `n` more workers into a pool, up to its capacity.
    async fn grow(&mut self, pool_name: &str, n: usize) -> Result<GrowOutcome> {
        if n == 0 {
            return Ok(GrowOutcome::Grew(0));
        }
        let (fits, descriptor) = {
            let pool = self
                .registry
                .pool(pool_name)
                .ok_or_else(|| Error::NoSuchPool(pool_name.to_string()))?;
            (pool.total() + n <= pool.config.max_count, pool.config.factory_descriptor.clone())
        };
        if !fits {
            return Ok(GrowOutcome::MaxCountReached);
        }

        let mut spawned_ok = 0usize;
        for _ in 0..n {
            match self.factory.spawn(pool_name, &descriptor).await {
                Ok(spawned) => {
                    let id = self.id_gen.next();
                    self.watch_worker(id, spawned.exited);
                    self.registry.members.insert(
                        id,
                        MemberRecord {
                            pool: pool_name.to_string(),
                            holder: Holder::Free,
                            state_timestamp: Instant::now(),
                        },
                    );
                    let pool = self.registry.pool_mut(pool_name).expect("pool exists");
                    pool.free_pids.push_back(FreeWorker { id, worker: spawned.worker });
                    pool.free_count += 1;
                    spawned_ok += 1;
                }
                Err(err) => {
                    log::warn!("pool '{pool_name}': worker spawn failed: {err}");
                }
            }
        }
        if spawned_ok < n {
            self.metrics.history(
                &format!("pooler.{pool_name}.add_pids_failed"),
                (n - spawned_ok) as f64,
            );
        }
        Ok(GrowOutcome::Grew(spawned_ok))
    }

    fn watch_worker(&self, id: WorkerId, exited: oneshot::Receiver<ExitReason>) {
        let cmd_tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            if let Ok(reason) = exited.await {
                let _ = cmd_tx.send(Command::WorkerExited { id, reason });
            }
        });
    }

    /// Picks a pool by trying the random, then free, then available
    /// selection strategies in order.
    async fn take_any(&mut self, consumer: ConsumerId) -> Result<(WorkerId, F::Worker)> {
        if self.registry.selector.is_empty() {
            return Err(Error::NoPools);
        }
        let candidates = [
            self.pick_random(),
            self.pick_max_free(),
            self.pick_max_available(),
        ];
        let mut last_err = Error::NoMembersAvailable;
        for pool in candidates.into_iter().flatten() {
            match self.take_named(&pool, consumer).await {
                Ok(result) => return Ok(result),
                Err(Error::NoMembersAvailable) => last_err = Error::NoMembersAvailable,
                Err(other) => return Err(other),
            }
        }
        Err(last_err)
    }

    fn pick_random(&self) -> Option<String> {
        let selector = &self.registry.selector;
        if selector.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..selector.len());
        Some(selector[idx].clone())
    }

    fn pick_max_free(&self) -> Option<String> {
        self.registry
            .pools
            .iter()
            .filter(|(_, pool)| pool.free_count > 0)
            .max_by_key(|(_, pool)| pool.free_count)
            .map(|(name, _)| name.clone())
    }

    fn pick_max_available(&self) -> Option<String> {
        self.registry
            .pools
            .iter()
            .filter(|(_, pool)| pool.available() > 0)
            .max_by_key(|(_, pool)| pool.available())
            .map(|(name, _)| name.clone())
    }

    /// Checks out a worker from a specific pool, growing it on demand.
    async fn take_named(&mut self, pool_name: &str, consumer: ConsumerId) -> Result<(WorkerId, F::Worker)> {
        if !self.registry.pools.contains_key(pool_name) {
            return Err(Error::NoSuchPool(pool_name.to_string()));
        }
        self.metrics.meter(&format!("pooler.{pool_name}.take_rate"), 1.0);

        let mut retries_left = self
            .registry
            .pool(pool_name)
            .map(|p| p.config.add_member_retry)
            .unwrap_or(0);

        loop {
            let pool = self.registry.pool_mut(pool_name).expect("pool exists");
            if let Some(free) = pool.free_pids.pop_front() {
                pool.free_count -= 1;
                pool.in_use_count += 1;
                let (in_use, free_count) = (pool.in_use_count, pool.free_count);

                let member = self.registry.members.get_mut(&free.id).expect("member exists");
                member.holder = Holder::Consumer(consumer);
                member.state_timestamp = Instant::now();
                self.registry.link_consumer(consumer, free.id);

                self.metrics
                    .histogram(&format!("pooler.{pool_name}.in_use_count"), in_use as f64);
                self.metrics
                    .histogram(&format!("pooler.{pool_name}.free_count"), free_count as f64);
                return Ok((free.id, free.worker));
            }

            if pool.in_use_count == pool.config.max_count {
                self.metrics.counter("pooler.error_no_members_count", 1.0);
                self.metrics.history("pooler.events", 1.0);
                return Err(Error::NoMembersAvailable);
            }

            if retries_left == 0 {
                self.metrics.counter("pooler.error_no_members_count", 1.0);
                return Err(Error::NoMembersAvailable);
            }

            match self.grow(pool_name, 1).await? {
                GrowOutcome::Grew(n) => {
                    log::debug!("pool {pool_name}: grew by {n} while retrying take");
                    retries_left -= 1;
                }
                GrowOutcome::MaxCountReached => {
                    self.metrics.counter("pooler.error_no_members_count", 1.0);
                    return Err(Error::NoMembersAvailable);
                }
            }
        }
    }

    /// Handles a worker being returned, either ok or failed.
    async fn handle_return(&mut self, id: WorkerId, consumer: ConsumerId, status: ReturnStatus, worker: F::Worker) {
        match status {
            ReturnStatus::Ok => {
                let Some(member) = self.registry.members.get_mut(&id) else {
                    return;
                };
                member.holder = Holder::Free;
                member.state_timestamp = Instant::now();
                let pool_name = member.pool.clone();
                self.registry.unlink_consumer(consumer, id);
                if let Some(pool) = self.registry.pool_mut(&pool_name) {
                    pool.free_pids.push_back(FreeWorker { id, worker });
                    pool.free_count += 1;
                    pool.in_use_count = pool.in_use_count.saturating_sub(1);
                    let (in_use, free_count) = (pool.in_use_count, pool.free_count);
                    self.metrics
                        .histogram(&format!("pooler.{pool_name}.in_use_count"), in_use as f64);
                    self.metrics
                        .histogram(&format!("pooler.{pool_name}.free_count"), free_count as f64);
                }
            }
            ReturnStatus::Fail => {
                if !self.registry.members.contains_key(&id) {
                    return;
                }
                let pool_name = self.registry.members[&id].pool.clone();
                self.remove_pid(id, Some(worker));
                // A max_count_reached from this grow is acceptable and
                // ignored -- the pool just stays one short until
                // the next on-demand take grows it again.
                let _ = self.grow(&pool_name, 1).await;
            }
        }
    }

    /// Removes a worker from the registry entirely. `owned_worker` is `Some` when the caller (an
    /// explicit fail-return) still holds the resource value; `None` when
    /// the Coordinator is reacting to a spontaneous exit notification for
    /// a worker that was checked out (the value lives with the consumer,
    /// not here, so there is nothing left to hand to the factory).
    fn remove_pid(&mut self, id: WorkerId, owned_worker: Option<F::Worker>) {
        let Some(member) = self.registry.members.remove(&id) else {
            self.metrics.history("pooler.events", 1.0);
            log::warn!("remove_pid: unknown worker {id}");
            return;
        };
        let pool_name = member.pool.clone();
        let (metric, worker) = match member.holder {
            Holder::Free => {
                let worker = self
                    .registry
                    .pool_mut(&pool_name)
                    .and_then(|pool| pool.remove_free(id))
                    .map(|free| free.worker);
                ("killed_free_count", worker)
            }
            Holder::Consumer(consumer) => {
                if let Some(pool) = self.registry.pool_mut(&pool_name) {
                    pool.in_use_count = pool.in_use_count.saturating_sub(1);
                }
                self.registry.unlink_consumer(consumer, id);
                ("killed_in_use_count", owned_worker)
            }
        };
        self.metrics.counter(&format!("pooler.{pool_name}.{metric}"), 1.0);
        if let Some(worker) = worker {
            let factory = self.factory.clone();
            let pool_name = pool_name.clone();
            tokio::spawn(async move { factory.terminate(&pool_name, worker).await });
        }
    }

    /// A worker exited on its own; treated as a return-with-fail.
    async fn on_worker_exited(&mut self, id: WorkerId, reason: ExitReason) {
        let Some(pool_name) = self.registry.members.get(&id).map(|m| m.pool.clone()) else {
            return;
        };
        log::warn!("pool '{pool_name}': worker {id} exited ({reason:?})");
        self.remove_pid(id, None);
        let _ = self.grow(&pool_name, 1).await;
    }

    /// A consumer exited; return every worker it held, in acquisition
    /// order.
    ///
    /// A [`ConsumerSession`](crate::handle::ConsumerSession) hands leases
    /// out as owned values, so normal use always calls `return_ok`/
    /// `return_fail` the moment a lease is done with — by the time the
    /// session itself drops, `held` is already empty and this is a no-op
    /// (the common case). If `held` is non-empty here, the caller leaked
    /// a lease; the resource value is gone with it, so there's nothing to
    /// place back on the free list regardless of `reason` — the only
    /// leak-proof move is to remove and replace it, same as a crash.
    async fn on_consumer_exited(&mut self, consumer: ConsumerId, reason: ExitReason) {
        let Some(held) = self.registry.consumers.get(&consumer).map(|c| c.held.clone()) else {
            return;
        };
        if reason.is_normal() {
            log::warn!("consumer {consumer} exited normally while still holding {} worker(s)", held.len());
        }
        for id in held {
            let Some(pool_name) = self.registry.members.get(&id).map(|m| m.pool.clone()) else {
                continue;
            };
            self.remove_pid(id, None);
            let _ = self.grow(&pool_name, 1).await;
        }
    }

    /// Retires idle-too-long free workers, never below the pool's init count.
    async fn on_cull_tick(&mut self, pool_name: &str) {
        let Some(pool) = self.registry.pool(pool_name) else {
            return;
        };
        if pool.config.cull_interval.is_disabled() {
            return;
        }
        let interval = pool.config.cull_interval.as_duration();
        let max_age = pool.config.max_age.as_duration();
        let max_cull = pool.free_count as i64 - (pool.config.init_count as i64 - pool.in_use_count as i64);

        if max_cull > 0 {
            let now = Instant::now();
            let candidates: Vec<WorkerId> = pool
                .free_pids
                .iter()
                .filter(|free| {
                    self.registry
                        .members
                        .get(&free.id)
                        .map(|m| now.duration_since(m.state_timestamp) > max_age)
                        .unwrap_or(false)
                })
                .take(max_cull as usize)
                .map(|free| free.id)
                .collect();
            for id in candidates {
                self.remove_pid(id, None);
            }
        }

        self.schedule_cull(pool_name.to_string(), interval);
    }
}
