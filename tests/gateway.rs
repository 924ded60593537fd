//! Request-path behaviour: refresh decisions, latency policies and cooldown.

mod helpers;

use chrono::Duration as TimeDelta;
use chrono_tz::Asia::Seoul;
use helpers::{
    FAILURE_COOLDOWN, FakeFetcher, ManualClock, Step, make_harness, make_payload, payload_seq,
    seoul, settle, ttl_schedule,
};
use holiday_cache::cache::{LatencyPolicy, RefreshReason, RefreshSchedule};
use std::time::Duration;

#[tokio::test]
async fn empty_cache_reports_no_data_and_warms_in_background() {
    let fetcher = FakeFetcher::new();
    let h = make_harness(
        fetcher.clone(),
        ManualClock::at(seoul(2025, 3, 1, 9, 0)),
        ttl_schedule(Duration::from_secs(120)),
        LatencyPolicy::NonBlocking,
    );

    let first = h.gateway.serve().await;
    assert!(first.is_empty());
    assert!(!first.diagnostics.has_cache);
    assert!(first.diagnostics.due);
    assert_eq!(first.diagnostics.reason, RefreshReason::Emergency);
    assert_eq!(first.diagnostics.cache_age_ms, None);
    assert!(first.diagnostics.refreshing);

    settle(&h.coalescer).await;

    let second = h.gateway.serve().await;
    assert!(!second.is_empty());
    assert!(!second.diagnostics.due);
    assert_eq!(second.diagnostics.call_count, 1);
    assert_eq!(second.diagnostics.cache_age_ms, Some(0));
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn blocking_bootstrap_serves_fresh_data() {
    let fetcher = FakeFetcher::new();
    let h = make_harness(
        fetcher.clone(),
        ManualClock::at(seoul(2025, 3, 1, 9, 0)),
        ttl_schedule(Duration::from_secs(120)),
        LatencyPolicy::Blocking,
    );

    let snapshot = h.gateway.serve().await;
    assert!(!snapshot.is_empty());
    assert_eq!(snapshot.diagnostics.call_count, 1);
    assert_eq!(snapshot.diagnostics.last_refresh_hour, Some(9));
    assert!(!snapshot.diagnostics.refreshing);

    let cached_at = snapshot.payload.as_ref().unwrap()["cachedAt"].as_str().unwrap().to_owned();
    assert_eq!(cached_at, "2025-03-01T00:00:00.000Z");
}

#[tokio::test]
async fn stale_ttl_serves_old_payload_while_refreshing() {
    let fetcher = FakeFetcher::new();
    let h = make_harness(
        fetcher.clone(),
        ManualClock::at(seoul(2025, 3, 1, 9, 0)),
        ttl_schedule(Duration::from_secs(120)),
        LatencyPolicy::NonBlocking,
    );
    h.coalescer.refresh().await.unwrap();

    // Up to and including the TTL nothing happens.
    h.clock.advance(TimeDelta::seconds(120));
    let fresh = h.gateway.serve().await;
    assert!(!fresh.diagnostics.due);
    assert_eq!(fetcher.calls(), 1);

    h.clock.advance(TimeDelta::seconds(1));
    let stale = h.gateway.serve().await;
    assert!(stale.diagnostics.due);
    assert_eq!(stale.diagnostics.reason, RefreshReason::Scheduled);
    assert_eq!(stale.diagnostics.call_count, 1);
    assert_eq!(stale.diagnostics.cache_age_ms, Some(121_000));
    assert_eq!(payload_seq(stale.payload.as_deref().unwrap()), Some(1));

    settle(&h.coalescer).await;
    let refreshed = h.gateway.peek();
    assert_eq!(refreshed.diagnostics.call_count, 2);
    assert_eq!(payload_seq(refreshed.payload.as_deref().unwrap()), Some(2));
}

#[tokio::test]
async fn concurrent_requests_on_stale_cache_fetch_once() {
    let fetcher = FakeFetcher::gated();
    let h = make_harness(
        fetcher.clone(),
        ManualClock::at(seoul(2025, 3, 1, 9, 0)),
        ttl_schedule(Duration::from_secs(120)),
        LatencyPolicy::Blocking,
    );

    let requests = futures::future::join_all((0..10).map(|_| h.gateway.serve()));
    let release = async {
        tokio::task::yield_now().await;
        fetcher.release(1);
    };
    let (snapshots, ()) = tokio::join!(requests, release);

    assert_eq!(fetcher.calls(), 1);
    assert!(snapshots.iter().all(|s| s.diagnostics.call_count == 1));
}

#[tokio::test]
async fn scheduled_hours_refresh_once_per_slot() {
    let fetcher = FakeFetcher::new();
    let schedule = RefreshSchedule::scheduled([10, 12], None, Seoul).unwrap();
    let h = make_harness(
        fetcher.clone(),
        ManualClock::at(seoul(2025, 3, 3, 10, 5)),
        schedule,
        LatencyPolicy::Blocking,
    );

    h.gateway.serve().await;
    assert_eq!(fetcher.calls(), 1);

    // Same hour, later minute: already refreshed this slot.
    h.clock.set(seoul(2025, 3, 3, 10, 45));
    let snapshot = h.gateway.serve().await;
    assert!(!snapshot.diagnostics.due);
    assert_eq!(snapshot.diagnostics.next_eligible.hour, 12);
    assert_eq!(fetcher.calls(), 1);

    // Outside the allowed hours nothing happens either.
    h.clock.set(seoul(2025, 3, 3, 11, 30));
    h.gateway.serve().await;
    assert_eq!(fetcher.calls(), 1);

    h.clock.set(seoul(2025, 3, 3, 12, 1));
    let snapshot = h.gateway.serve().await;
    assert_eq!(snapshot.diagnostics.last_refresh_hour, Some(12));
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn emergency_threshold_overrides_schedule() {
    let fetcher = FakeFetcher::new();
    let schedule =
        RefreshSchedule::scheduled([10], Some(Duration::from_secs(6 * 3600)), Seoul).unwrap();
    let h = make_harness(
        fetcher.clone(),
        ManualClock::at(seoul(2025, 3, 1, 10, 0)),
        schedule,
        LatencyPolicy::Blocking,
    );
    h.gateway.serve().await;

    h.clock.set(seoul(2025, 3, 3, 15, 0));
    let snapshot = h.gateway.serve().await;
    assert!(snapshot.diagnostics.due);
    assert_eq!(snapshot.diagnostics.reason, RefreshReason::Emergency);
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn failed_refresh_cools_down_before_retrying() {
    let fetcher = FakeFetcher::scripted(vec![Step::Fail("HTTP 503"), Step::Ok(make_payload(2))]);
    let h = make_harness(
        fetcher.clone(),
        ManualClock::at(seoul(2025, 3, 1, 9, 0)),
        ttl_schedule(Duration::from_secs(120)),
        LatencyPolicy::Blocking,
    );

    // A blocking failure is still answered, just without data.
    let failed = h.gateway.serve().await;
    assert!(failed.is_empty());
    assert_eq!(failed.diagnostics.upstream_failures, 1);
    assert!(failed.diagnostics.last_error.as_ref().unwrap().message.contains("HTTP 503"));

    h.clock.advance(TimeDelta::seconds(10));
    let cooling = h.gateway.serve().await;
    assert!(cooling.diagnostics.due);
    assert!(cooling.diagnostics.cooling_down);
    assert_eq!(fetcher.calls(), 1);

    h.clock.advance(TimeDelta::from_std(FAILURE_COOLDOWN).unwrap());
    let recovered = h.gateway.serve().await;
    assert!(!recovered.is_empty());
    assert!(!recovered.diagnostics.cooling_down);
    assert_eq!(recovered.diagnostics.call_count, 1);
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn peek_never_triggers_a_fetch() {
    let fetcher = FakeFetcher::new();
    let h = make_harness(
        fetcher.clone(),
        ManualClock::at(seoul(2025, 3, 1, 9, 0)),
        ttl_schedule(Duration::from_secs(120)),
        LatencyPolicy::NonBlocking,
    );

    let snapshot = h.gateway.peek();
    assert!(snapshot.is_empty());
    assert!(snapshot.diagnostics.due);
    assert!(!h.coalescer.in_flight());
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bursts_across_worker_threads_fetch_once_per_due_window() {
    let fetcher = FakeFetcher::new();
    let h = make_harness(
        fetcher.clone(),
        ManualClock::at(seoul(2025, 3, 1, 9, 0)),
        ttl_schedule(Duration::from_secs(120)),
        LatencyPolicy::NonBlocking,
    );

    for round in 1..=50 {
        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let gateway = h.gateway.clone();
                tokio::spawn(async move { gateway.serve().await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        settle(&h.coalescer).await;
        assert_eq!(fetcher.calls(), round);

        h.clock.advance(TimeDelta::seconds(121));
    }
}
