//! Pool lifecycle ordering rules, exercised through the public API.

use resilver_core::testing::{AdminCall, MemoryFillBackend, RecordingReaper, ScriptedPool};
use resilver_core::{LifecycleSettings, MonitorSettings, NoTelemetry, PoolLifecycle, PoolState, ResilverMonitor, StatusParser};
use resilver_proto::{Error, FragLevel, LayoutSpec};

const TIB: u64 = 1 << 40;

const COMPLETE: &str = "  pool: tank
 state: DEGRADED
status: One or more devices are faulted in response to persistent errors.
  scan: resilvered 1.00T in 00:10:00 with 0 errors on Sun Oct 19 10:10:00 2026
config:
\tNAME          STATE     READ WRITE CKSUM
\ttank          DEGRADED     0     0     0
\t  raidz2-0    DEGRADED     0     0     0
";

fn lifecycle(pool: &ScriptedPool) -> PoolLifecycle<ScriptedPool> {
    PoolLifecycle::new(pool.clone(), Box::new(RecordingReaper::new()), LifecycleSettings::default())
}

fn pool() -> ScriptedPool {
    ScriptedPool::new()
        .with_disks((0..8).map(|i| format!("sd{}", (b'a' + i as u8) as char)).collect())
        .with_capacity(10 * TIB)
        .with_statuses([COMPLETE])
}

#[tokio::test(start_paused = true)]
async fn test_fault_requires_filled_pool() {
    let pool = pool();
    let mut lc = lifecycle(&pool);

    assert!(matches!(lc.inject_fault().await, Err(Error::LifecycleInvariant(_))));
    lc.create(&LayoutSpec::new("raidz2", 8, 0), "1M").await.unwrap();
    assert!(matches!(lc.inject_fault().await, Err(Error::LifecycleInvariant(_))));
    assert!(!pool.calls().iter().any(|c| matches!(c, AdminCall::Offline(_))));
}

#[tokio::test(start_paused = true)]
async fn test_restore_requires_resilver() {
    let pool = pool();
    let mut lc = lifecycle(&pool);
    let mut fill = MemoryFillBackend::new(pool.clone(), TIB);

    lc.create(&LayoutSpec::new("raidz2", 8, 0), "1M").await.unwrap();
    lc.fill(&mut fill, FragLevel::None).await.unwrap();
    lc.inject_fault().await.unwrap();
    assert!(matches!(lc.restore().await, Err(Error::LifecycleInvariant(_))));
}

#[tokio::test(start_paused = true)]
async fn test_full_cycle_history() {
    let pool = pool();
    let mut lc = lifecycle(&pool);
    let mut fill = MemoryFillBackend::new(pool.clone(), TIB);
    let monitor = ResilverMonitor::new(MonitorSettings::default(), StatusParser::new());

    lc.create(&LayoutSpec::new("raidz2", 8, 0), "128k").await.unwrap();
    lc.fill(&mut fill, FragLevel::None).await.unwrap();
    lc.inject_fault().await.unwrap();
    let outcome = lc.await_resilver(&monitor, &mut NoTelemetry, |_| {}).await.unwrap();
    lc.restore().await.unwrap();
    // A second fault on the same pool is allowed once it is healthy again.
    lc.inject_fault().await.unwrap();
    lc.destroy().await.unwrap();

    assert_eq!(outcome.completion.issued, "1.00T");
    assert_eq!(
        lc.history(),
        &[
            PoolState::Uninitialized,
            PoolState::Created,
            PoolState::Filled,
            PoolState::FaultInjected,
            PoolState::Resilvering,
            PoolState::Healthy,
            PoolState::FaultInjected,
            PoolState::Destroyed,
        ]
    );
    assert!(lc.plan().is_none());
}
