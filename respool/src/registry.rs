//!
//! Internal pool state
//!
//! Owned exclusively by the Coordinator task: the pool table, the worker
//! index and the consumer index. Nothing here is ever shared or locked —
//! the single-writer invariant comes from the fact that only the
//! Coordinator's own task ever touches this module.
//!
use crate::config::PoolConfig;
use crate::factory::WorkerId;
use crate::handle::ConsumerId;
use std::collections::{HashMap, VecDeque};
use tokio::time::Instant;

/// Who currently holds a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Holder {
    Free,
    Consumer(ConsumerId),
}

/// Metadata for one live worker. The actual resource (`W`) lives either in
/// the owning pool's `free_pids` (while free) or with the consumer (while
/// in use) — this record never owns it.
pub(crate) struct MemberRecord {
    pub(crate) pool: String,
    pub(crate) holder: Holder,
    pub(crate) state_timestamp: Instant,
}

/// A free worker: its identity plus the actual resource, ordered FIFO in
/// the owning pool's `free_pids`, so that, independent of timestamps, the
/// longest-free worker is always nearest the front — see DESIGN.md.
pub(crate) struct FreeWorker<W> {
    pub(crate) id: WorkerId,
    pub(crate) worker: W,
}

/// One named pool's configuration, free list and counters.
pub(crate) struct Pool<W> {
    pub(crate) config: PoolConfig,
    pub(crate) free_pids: VecDeque<FreeWorker<W>>,
    pub(crate) in_use_count: usize,
    pub(crate) free_count: usize,
}

impl<W> Pool<W> {
    pub(crate) fn new(config: PoolConfig) -> Self {
        Self {
            config,
            free_pids: VecDeque::new(),
            in_use_count: 0,
            free_count: 0,
        }
    }

    pub(crate) fn total(&self) -> usize {
        self.in_use_count + self.free_count
    }

    pub(crate) fn available(&self) -> usize {
        self.config.max_count.saturating_sub(self.in_use_count)
    }

    /// Remove a free worker by id, wherever it sits in the deque (culling
    /// and spontaneous-exit reclamation both need this; take only ever
    /// needs the front).
    pub(crate) fn remove_free(&mut self, id: WorkerId) -> Option<FreeWorker<W>> {
        let pos = self.free_pids.iter().position(|f| f.id == id)?;
        let worker = self.free_pids.remove(pos);
        if worker.is_some() {
            self.free_count -= 1;
        }
        worker
    }
}

/// One consumer currently holding at least one worker.
///
/// `held` preserves acquisition order (a plain `Vec`, not a `HashSet`): a
/// worker can never appear twice (it is unlinked from `free_pids` the
/// moment it is handed out), and reclaiming a crashed consumer's workers
/// in a deterministic order needs that ordering — see DESIGN.md.
pub(crate) struct ConsumerRecord {
    pub(crate) held: Vec<WorkerId>,
}

/// The pool table plus the two reverse indices, and the ordered list of
/// pool names used for uniform random selection (`PoolSelector`).
pub(crate) struct Registry<W> {
    pub(crate) pools: HashMap<String, Pool<W>>,
    pub(crate) selector: Vec<String>,
    pub(crate) members: HashMap<WorkerId, MemberRecord>,
    pub(crate) consumers: HashMap<ConsumerId, ConsumerRecord>,
}

impl<W> Default for Registry<W> {
    fn default() -> Self {
        Self {
            pools: HashMap::new(),
            selector: Vec::new(),
            members: HashMap::new(),
            consumers: HashMap::new(),
        }
    }
}

impl<W> Registry<W> {
    pub(crate) fn pool(&self, name: &str) -> Option<&Pool<W>> {
        self.pools.get(name)
    }

    pub(crate) fn pool_mut(&mut self, name: &str) -> Option<&mut Pool<W>> {
        self.pools.get_mut(name)
    }

    /// Link a worker into the consumer's held set, creating the
    /// `ConsumerEntry` if this is its first worker.
    pub(crate) fn link_consumer(&mut self, consumer: ConsumerId, id: WorkerId) {
        let entry = self
            .consumers
            .entry(consumer)
            .or_insert_with(|| ConsumerRecord { held: Vec::new() });
        if !entry.held.contains(&id) {
            entry.held.push(id);
        }
    }

    /// Remove a worker from a consumer's held set, dropping the
    /// `ConsumerEntry` entirely once it becomes empty. Returns `true` if
    /// the entry was dropped.
    pub(crate) fn unlink_consumer(&mut self, consumer: ConsumerId, id: WorkerId) -> bool {
        if let Some(entry) = self.consumers.get_mut(&consumer) {
            entry.held.retain(|held| *held != id);
            if entry.held.is_empty() {
                self.consumers.remove(&consumer);
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_unlink_consumer() {
        let mut reg: Registry<()> = Registry::default();
        let c = ConsumerId::for_test(1);
        reg.link_consumer(c, WorkerId::for_test(1));
        reg.link_consumer(c, WorkerId::for_test(2));
        assert_eq!(reg.consumers.get(&c).unwrap().held.len(), 2);
        assert!(!reg.unlink_consumer(c, WorkerId::for_test(1)));
        assert!(reg.unlink_consumer(c, WorkerId::for_test(2)));
        assert!(!reg.consumers.contains_key(&c));
    }
}
