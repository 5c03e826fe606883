//!
//! End-to-end scenario tests against the in-memory
//! [`factory::memory::MemoryFactory`] so the suite runs hermetically and
//! fast.
//!
use crate::config::{PoolConfig, TimeSpec, TimeUnit};
use crate::factory::memory::MemoryFactory;
use crate::{spawn, CoordinatorHandle, Error};

fn setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn handle() -> CoordinatorHandle<MemoryFactory> {
    spawn(MemoryFactory::default(), None)
}

/// A worker checked out and returned ends up back in the free list.
#[tokio::test]
async fn basic_checkout_and_return() {
    setup();
    let handle = handle();
    handle
        .add_pool(PoolConfig::new("p", serde_json::json!(null)).max_count(3).init_count(2))
        .await
        .unwrap();

    let stats = handle.stats().await.unwrap();
    let p = &stats.pools[0];
    assert_eq!((p.free, p.checked_out), (2, 0));

    let w = handle.take_named("p").await.unwrap();
    let stats = handle.stats().await.unwrap();
    assert_eq!((stats.pools[0].free, stats.pools[0].checked_out), (1, 1));

    drop(w); // returns ok
    // Drop sends asynchronously; give the coordinator a tick to process it.
    tokio::task::yield_now().await;
    let stats = handle.stats().await.unwrap();
    assert_eq!((stats.pools[0].free, stats.pools[0].checked_out), (2, 0));
}

/// Three consumers exhaust a pool seeded with one worker and
/// `add_member_retry=2`, growing it on demand; a fourth is rejected.
#[tokio::test]
async fn on_demand_growth_rejects_past_capacity() {
    setup();
    let handle = handle();
    handle
        .add_pool(
            PoolConfig::new("p", serde_json::json!(null))
                .max_count(3)
                .init_count(1)
                .add_member_retry(2),
        )
        .await
        .unwrap();

    let w1 = handle.take_named("p").await.unwrap();
    let w2 = handle.take_named("p").await.unwrap();
    let w3 = handle.take_named("p").await.unwrap();
    assert_ne!(w1.id(), w2.id());
    assert_ne!(w2.id(), w3.id());

    let stats = handle.stats().await.unwrap();
    assert_eq!((stats.pools[0].free, stats.pools[0].checked_out), (0, 3));

    let err = handle.take_named("p").await.unwrap_err();
    assert!(matches!(err, Error::NoMembersAvailable));
}

/// A crashing consumer reclaims every worker it held, regardless of
/// whether the exit reason was normal or abnormal.
#[tokio::test]
async fn consumer_crash_reclaims_workers() {
    setup();
    let handle = handle();
    handle
        .add_pool(PoolConfig::new("p", serde_json::json!(null)).max_count(3).init_count(2))
        .await
        .unwrap();

    let session = handle.consumer();
    let (id, _worker) = session.take_named("p").await.unwrap();
    let stats = handle.stats().await.unwrap();
    assert_eq!((stats.pools[0].free, stats.pools[0].checked_out), (1, 1));

    session.crash("simulated crash");
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    let stats = handle.stats().await.unwrap();
    // The worker is unrecoverable once the caller has it, so it is
    // removed and replaced rather than trusted back onto the free list.
    assert_eq!((stats.pools[0].free, stats.pools[0].checked_out), (2, 0));
    let _ = id;
}

/// A spontaneous worker exit triggers remove + replace.
#[tokio::test]
async fn worker_crash_triggers_replacement() {
    setup();
    let handle = handle();
    handle
        .add_pool(
            PoolConfig::new("p", serde_json::json!(null))
                .max_count(2)
                .init_count(2)
                .add_member_retry(1),
        )
        .await
        .unwrap();

    let mut w = handle.take_named("p").await.unwrap();
    w.kill("spontaneous exit");
    // Drop still runs: ScopedWorker will send return(ok) for a value
    // whose member entry no longer exists, which the Coordinator ignores.
    drop(w);

    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    let stats = handle.stats().await.unwrap();
    assert_eq!((stats.pools[0].free, stats.pools[0].checked_out), (2, 0));
}

/// take_any falls back from an exhausted pool to one with free
/// capacity.
#[tokio::test]
async fn take_any_falls_back_across_pools() {
    setup();
    let handle = handle();
    handle
        .add_pool(PoolConfig::new("A", serde_json::json!(null)).max_count(1).init_count(1))
        .await
        .unwrap();
    handle
        .add_pool(PoolConfig::new("B", serde_json::json!(null)).max_count(2).init_count(2))
        .await
        .unwrap();

    // Exhaust A.
    let _a = handle.take_named("A").await.unwrap();

    let w = handle.take_any().await.unwrap();
    let stats = handle.stats().await.unwrap();
    let b = stats.pools.iter().find(|p| p.name == "B").unwrap();
    assert_eq!((b.free, b.checked_out), (1, 1));
    drop(w);
}

/// Culling never reduces a pool below its `init_count` floor, and
/// prefers the oldest-free workers.
#[tokio::test(start_paused = true)]
async fn culling_respects_init_count_floor() {
    setup();
    let handle = handle();
    handle
        .add_pool(
            PoolConfig::new("p", serde_json::json!(null))
                .max_count(5)
                .init_count(2)
                .add_member_retry(1)
                .cull_interval(TimeSpec::new(100, TimeUnit::Ms))
                .max_age(TimeSpec::new(50, TimeUnit::Ms)),
        )
        .await
        .unwrap();

    let w1 = handle.take_named("p").await.unwrap();
    let w2 = handle.take_named("p").await.unwrap();
    let w3 = handle.take_named("p").await.unwrap();
    let w4 = handle.take_named("p").await.unwrap();

    let stats = handle.stats().await.unwrap();
    assert_eq!((stats.pools[0].free, stats.pools[0].checked_out), (0, 4));

    drop(w1);
    drop(w2);
    drop(w3);
    drop(w4);
    tokio::task::yield_now().await;

    let stats = handle.stats().await.unwrap();
    assert_eq!((stats.pools[0].free, stats.pools[0].checked_out), (4, 0));

    // Let the cull tick fire after max_age has elapsed.
    tokio::time::advance(std::time::Duration::from_millis(120)).await;
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    let stats = handle.stats().await.unwrap();
    assert_eq!((stats.pools[0].free, stats.pools[0].checked_out), (2, 0));
}
