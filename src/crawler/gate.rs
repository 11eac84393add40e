//! Fetch admission control.
//!
//! Enforces the global and per-host concurrency caps across every fetch in
//! the process, smooths the request issue rate, and schedules per-host
//! backoff after server pressure (429/5xx). Counters are process-local;
//! multi-process deployments split the global cap across processes.

use dashmap::DashMap;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use rand::Rng;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// An admitted fetch slot. Dropping it releases both buckets, so every exit
/// path releases exactly once.
pub struct Permit {
    _global: OwnedSemaphorePermit,
    _host: OwnedSemaphorePermit,
}

struct HostState {
    semaphore: Arc<Semaphore>,
    attempts: AtomicU32,
    /// Earliest instant the next request to this host may be admitted.
    next_admission: Mutex<Option<Instant>>,
}

/// Global + per-host admission gate for outbound fetches.
pub struct RateGate {
    global: Arc<Semaphore>,
    per_host: usize,
    hosts: DashMap<String, Arc<HostState>>,
    /// Smooths the process-wide request issue rate so a burst of workers
    /// does not fire the whole global allowance in one instant.
    smoother: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl RateGate {
    pub fn new(global_concurrency: u32, per_host_concurrency: u32) -> Self {
        let rate = NonZeroU32::new(global_concurrency.max(1)).unwrap();
        Self {
            global: Arc::new(Semaphore::new(global_concurrency.max(1) as usize)),
            per_host: per_host_concurrency.max(1) as usize,
            hosts: DashMap::new(),
            smoother: RateLimiter::direct(Quota::per_second(rate).allow_burst(rate)),
        }
    }

    fn host_state(&self, host: &str) -> Arc<HostState> {
        self.hosts
            .entry(host.to_string())
            .or_insert_with(|| {
                Arc::new(HostState {
                    semaphore: Arc::new(Semaphore::new(self.per_host)),
                    attempts: AtomicU32::new(0),
                    next_admission: Mutex::new(None),
                })
            })
            .clone()
    }

    /// Block until a slot exists in both the global and the host bucket,
    /// honoring any scheduled backoff for the host.
    ///
    /// Callers bound this with their crawl deadline; the gate itself never
    /// gives up.
    pub async fn acquire(&self, host: &str) -> Permit {
        let state = self.host_state(host);

        loop {
            let wait = {
                let next = state.next_admission.lock().unwrap();
                next.map(|at| at.saturating_duration_since(Instant::now()))
                    .unwrap_or(Duration::ZERO)
            };
            if wait.is_zero() {
                break;
            }
            tracing::trace!(host, wait_ms = wait.as_millis() as u64, "host backoff");
            tokio::time::sleep(wait).await;
        }

        let global = self
            .global
            .clone()
            .acquire_owned()
            .await
            .expect("gate semaphore closed");
        let host_permit = state
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("gate semaphore closed");

        self.smoother.until_ready().await;

        Permit {
            _global: global,
            _host: host_permit,
        }
    }

    /// Push the host's next admission out after a 429/5xx.
    pub fn report_failure(&self, host: &str) {
        let state = self.host_state(host);
        let attempts = state.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let backoff = backoff_delay(attempts);
        let mut next = state.next_admission.lock().unwrap();
        *next = Some(Instant::now() + backoff);
        tracing::debug!(host, attempts, backoff_ms = backoff.as_millis() as u64, "scheduled host backoff");
    }

    /// Clear backoff state after a successful response.
    pub fn report_success(&self, host: &str) {
        let state = self.host_state(host);
        state.attempts.store(0, Ordering::Relaxed);
        *state.next_admission.lock().unwrap() = None;
    }
}

/// Exponential backoff with jitter: base 500 ms, factor 2, cap 30 s, ±25 %.
fn backoff_delay(attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(16);
    let raw = BACKOFF_BASE.saturating_mul(1u32 << exponent).min(BACKOFF_CAP);
    let jitter = rand::rng().random_range(0.75..=1.25);
    raw.mul_f64(jitter).min(BACKOFF_CAP)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn backoff_grows_and_caps() {
        // Jitter is ±25%, so compare against the widest bounds
        let first = backoff_delay(1);
        assert!(first >= Duration::from_millis(375) && first <= Duration::from_millis(625));

        let fourth = backoff_delay(4);
        assert!(fourth >= Duration::from_millis(3000));

        let huge = backoff_delay(32);
        assert!(huge <= BACKOFF_CAP);
    }

    #[tokio::test]
    async fn per_host_cap_is_enforced() {
        let gate = Arc::new(RateGate::new(32, 2));
        let running = Arc::new(AtomicI32::new(0));
        let peak = Arc::new(AtomicI32::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let gate = gate.clone();
            let running = running.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _permit = gate.acquire("venue.example").await;
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2, "per-host cap exceeded");
    }

    #[tokio::test]
    async fn failure_defers_next_admission() {
        let gate = RateGate::new(4, 2);
        gate.report_failure("slow.example");

        let started = Instant::now();
        let _permit = gate.acquire("slow.example").await;
        // First backoff tier is 500ms +/- 25%
        assert!(started.elapsed() >= Duration::from_millis(300));

        gate.report_success("slow.example");
        let started = Instant::now();
        let _second = gate.acquire("slow.example").await;
        assert!(started.elapsed() < Duration::from_millis(200));
    }
}
