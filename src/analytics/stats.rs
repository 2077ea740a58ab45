use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Default)]
pub struct Stats {
    pub requests_received: AtomicU64,
    pub invalid_requests: AtomicU64,
    pub calls_admitted: AtomicU64,
    pub locally_throttled: AtomicU64,
    pub remotely_throttled: AtomicU64,
    pub operations_failed: AtomicU64,
    pub cooldown_ms_total: AtomicU64,
    pub last_request_latency_ms: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_requests_received(&self) {
        self.requests_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_invalid_requests(&self) {
        self.invalid_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_calls_admitted(&self) {
        self.calls_admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_locally_throttled(&self) {
        self.locally_throttled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_remotely_throttled(&self) {
        self.remotely_throttled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_operations_failed(&self) {
        self.operations_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_cooldown(&self, cooldown: Duration) {
        self.cooldown_ms_total
            .fetch_add(cooldown.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn update_request_latency(&self, ms: u64) {
        self.last_request_latency_ms.store(ms, Ordering::Relaxed);
    }

    pub fn log_stats(&self) {
        let received = self.requests_received.load(Ordering::Relaxed);
        let invalid = self.invalid_requests.load(Ordering::Relaxed);
        let admitted = self.calls_admitted.load(Ordering::Relaxed);
        let local = self.locally_throttled.load(Ordering::Relaxed);
        let remote = self.remotely_throttled.load(Ordering::Relaxed);
        let failed = self.operations_failed.load(Ordering::Relaxed);
        let cooldown_s = self.cooldown_ms_total.load(Ordering::Relaxed) / 1000;
        let latency = self.last_request_latency_ms.load(Ordering::Relaxed);

        info!(
            "STATS: Requests: {} ({} invalid) | Admitted: {} | Throttled: {} local, {} remote | \
             Failed: {} | Cooldown total: {}s | Last latency: {}ms",
            received, invalid, admitted, local, remote, failed, cooldown_s, latency
        );
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_stats_concurrency() {
        let stats = Arc::new(Stats::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let stats = stats.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    stats.inc_calls_admitted();
                    stats.add_cooldown(Duration::from_millis(15_000));
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(stats.calls_admitted.load(Ordering::Relaxed), 1000);
        assert_eq!(stats.cooldown_ms_total.load(Ordering::Relaxed), 15_000_000);
    }
}
