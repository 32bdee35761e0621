//! Cooldown gate for the forecast API.
//!
//! The bounds endpoint bills per call and rejects bursts, so calls are
//! spaced by a minimum interval regardless of how many cache keys fan in
//! to it. This is orthogonal to cache TTLs: the TTL decides how often a
//! fetch is attempted, the gate decides how close together attempts may
//! land on the upstream.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Enforces a minimum interval between dispatches to one endpoint.
///
/// The last-dispatch timestamp is taken immediately before the wrapped
/// call is issued, on every attempt including ones that go on to fail,
/// so overlapping slow calls and error loops still respect the spacing.
#[derive(Debug, Clone)]
pub struct CooldownGate {
    min_interval: Duration,
    last_dispatch: Arc<Mutex<Option<Instant>>>,
}

impl CooldownGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_dispatch: Arc::new(Mutex::new(None)),
        }
    }

    pub fn from_millis(cooldown_ms: u64) -> Self {
        Self::new(Duration::from_millis(cooldown_ms))
    }

    /// Run `call` once the cooldown allows it.
    ///
    /// Waiters queue on the gate: each dispatch lands at least
    /// `min_interval` after the previous one. The wait is a suspension
    /// point; other tasks keep running.
    pub async fn guard<T, F, Fut>(&self, call: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        {
            let mut last = self.last_dispatch.lock().await;
            if let Some(prev) = *last {
                let elapsed = prev.elapsed();
                if elapsed < self.min_interval {
                    let wait = self.min_interval - elapsed;
                    debug!("Cooldown: waiting {:?} before dispatch", wait);
                    sleep(wait).await;
                }
            }
            *last = Some(Instant::now());
        }

        call().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    type DispatchLog = Arc<StdMutex<Vec<Instant>>>;

    fn record(log: &DispatchLog) {
        log.lock().unwrap().push(Instant::now());
    }

    fn assert_spacing(log: &DispatchLog, min: Duration) {
        let times = log.lock().unwrap();
        for pair in times.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(
                gap >= min,
                "dispatch gap {:?} violates cooldown {:?}",
                gap,
                min
            );
        }
    }

    #[tokio::test]
    async fn test_back_to_back_calls_are_spaced() {
        let gate = CooldownGate::new(Duration::from_millis(40));
        let log: DispatchLog = Arc::new(StdMutex::new(Vec::new()));

        for _ in 0..3 {
            let log = log.clone();
            gate.guard(|| async move { record(&log) }).await;
        }

        assert_eq!(log.lock().unwrap().len(), 3);
        assert_spacing(&log, Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_first_call_is_not_delayed() {
        let gate = CooldownGate::new(Duration::from_millis(500));
        let started = Instant::now();
        gate.guard(|| async {}).await;
        assert!(
            started.elapsed() < Duration::from_millis(100),
            "first dispatch should not wait"
        );
    }

    #[tokio::test]
    async fn test_overlapping_slow_calls_keep_spacing() {
        let gate = CooldownGate::new(Duration::from_millis(40));
        let log: DispatchLog = Arc::new(StdMutex::new(Vec::new()));

        // Three concurrent callers, each slower than the cooldown.
        let mut handles = Vec::new();
        for _ in 0..3 {
            let gate = gate.clone();
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                gate.guard(|| async move {
                    record(&log);
                    sleep(Duration::from_millis(90)).await;
                })
                .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(log.lock().unwrap().len(), 3);
        assert_spacing(&log, Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_failures_still_consume_the_cooldown() {
        let gate = CooldownGate::new(Duration::from_millis(40));
        let log: DispatchLog = Arc::new(StdMutex::new(Vec::new()));

        for i in 0..3 {
            let log = log.clone();
            let result: Result<(), &str> = gate
                .guard(|| async move {
                    record(&log);
                    if i < 2 {
                        Err("upstream down")
                    } else {
                        Ok(())
                    }
                })
                .await;
            if i < 2 {
                assert!(result.is_err());
            }
        }

        // Error responses must not let the next attempt through early.
        assert_spacing(&log, Duration::from_millis(40));
    }
}
