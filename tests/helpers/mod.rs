//! Shared fixtures for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Asia::Seoul;
use holiday_cache::cache::{
    CacheGateway, CacheStore, Clock, Coalescer, LatencyPolicy, RefreshSchedule,
};
use holiday_cache::upstream::{UpstreamError, UpstreamFetcher};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// One scripted upstream outcome.
pub enum Step {
    Ok(Value),
    Fail(&'static str),
}

/// Upstream stand-in that counts calls and replays a script.
///
/// Once the script runs out every call succeeds with [`make_payload`]. A
/// gated fetcher holds each call until [`FakeFetcher::release`] hands out a
/// permit.
pub struct FakeFetcher {
    calls: AtomicUsize,
    script: Mutex<VecDeque<Step>>,
    gate: Option<Semaphore>,
}

impl FakeFetcher {
    pub fn new() -> Arc<Self> {
        Self::build(Vec::new(), false)
    }

    pub fn gated() -> Arc<Self> {
        Self::build(Vec::new(), true)
    }

    pub fn scripted(steps: Vec<Step>) -> Arc<Self> {
        Self::build(steps, false)
    }

    pub fn scripted_gated(steps: Vec<Step>) -> Arc<Self> {
        Self::build(steps, true)
    }

    fn build(steps: Vec<Step>, gated: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            script: Mutex::new(steps.into()),
            gate: gated.then(|| Semaphore::new(0)),
        })
    }

    /// Let `n` held (or future) calls proceed.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamFetcher for FakeFetcher {
    async fn fetch(&self) -> Result<Value, UpstreamError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .expect("gate semaphore closed")
                .forget();
        }

        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Ok(value)) => Ok(value),
            Some(Step::Fail(message)) => Err(UpstreamError::Other(anyhow::anyhow!(message))),
            None => Ok(make_payload(call)),
        }
    }
}

/// Clock the test moves by hand.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(now),
        })
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// A wall-clock time in Seoul, as UTC.
pub fn seoul(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Seoul
        .with_ymd_and_hms(year, month, day, hour, minute, 0)
        .single()
        .expect("unambiguous Seoul time")
        .with_timezone(&Utc)
}

/// Upstream-shaped document tagged with the call that produced it.
pub fn make_payload(call: usize) -> Value {
    json!({
        "response": {
            "header": { "resultCode": "00", "resultMsg": "NORMAL SERVICE." },
            "body": {
                "items": { "item": [
                    { "dateKind": "01", "dateName": "설날", "isHoliday": "Y", "locdate": 20250129, "seq": call },
                    { "dateKind": "01", "dateName": "삼일절", "isHoliday": "Y", "locdate": 20250301, "seq": call }
                ]},
                "numOfRows": 2,
                "pageNo": 1,
                "totalCount": 2
            }
        }
    })
}

/// The `seq` tag written by [`make_payload`].
pub fn payload_seq(payload: &Value) -> Option<u64> {
    payload
        .pointer("/response/body/items/item/0/seq")
        .and_then(Value::as_u64)
}

pub struct Harness {
    pub store: Arc<CacheStore>,
    pub coalescer: Coalescer,
    pub gateway: Arc<CacheGateway>,
    pub fetcher: Arc<FakeFetcher>,
    pub clock: Arc<ManualClock>,
}

pub const FETCH_TIMEOUT: Duration = Duration::from_secs(5);
pub const FAILURE_COOLDOWN: Duration = Duration::from_secs(30);

/// Wire a full cache around a fake fetcher and a manual clock.
pub fn make_harness(
    fetcher: Arc<FakeFetcher>,
    clock: Arc<ManualClock>,
    schedule: RefreshSchedule,
    latency: LatencyPolicy,
) -> Harness {
    make_harness_with_timeout(fetcher, clock, schedule, latency, FETCH_TIMEOUT)
}

pub fn make_harness_with_timeout(
    fetcher: Arc<FakeFetcher>,
    clock: Arc<ManualClock>,
    schedule: RefreshSchedule,
    latency: LatencyPolicy,
    fetch_timeout: Duration,
) -> Harness {
    let store = Arc::new(CacheStore::new(schedule.timezone()));
    let coalescer = Coalescer::new(
        store.clone(),
        fetcher.clone(),
        clock.clone(),
        fetch_timeout,
    );
    let gateway = Arc::new(CacheGateway::new(
        store.clone(),
        coalescer.clone(),
        schedule,
        latency,
        FAILURE_COOLDOWN,
        clock.clone(),
    ));

    Harness {
        store,
        coalescer,
        gateway,
        fetcher,
        clock,
    }
}

pub fn ttl_schedule(ttl: Duration) -> RefreshSchedule {
    RefreshSchedule::ttl(ttl, Seoul).expect("valid ttl")
}

/// Wait for a background refresh to finish.
pub async fn settle(coalescer: &Coalescer) {
    for _ in 0..200 {
        if !coalescer.in_flight() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("refresh still in flight");
}
