use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::admission::policy::PolicyTable;
use crate::admission::usage::UsageLog;
use crate::analytics::stats::Stats;
use crate::error::{GateError, RemoteFailure};
use crate::utils::delay::{Sleeper, TokioSleeper};
use crate::utils::time::{Clock, SystemClock};

/// What happened to an admitted remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    RateLimitedByRemote,
    OtherFailure,
}

impl Outcome {
    pub fn classify<T, E: RemoteFailure>(result: &std::result::Result<T, E>) -> Self {
        match result {
            Ok(_) => Outcome::Success,
            Err(e) if e.is_rate_limited() => Outcome::RateLimitedByRemote,
            Err(_) => Outcome::OtherFailure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reservation {
    pub allowed: bool,
    /// Only set on denial, and only when there is an entry to age out.
    pub retry_after: Option<Duration>,
}

impl Reservation {
    fn allowed() -> Self {
        Self { allowed: true, retry_after: None }
    }

    fn denied(retry_after: Option<Duration>) -> Self {
        Self { allowed: false, retry_after }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after.map(|d| d.as_secs_f64().round() as u64)
    }
}

/// Gates outbound calls per endpoint class.
///
/// Each endpoint owns its own usage log behind its own async mutex, so the
/// prune/check/record sequence for one endpoint is serialized while other
/// endpoints proceed independently. The post-success cooldown runs after the
/// endpoint's guard is released.
pub struct AdmissionController {
    policies: PolicyTable,
    logs: DashMap<String, Arc<Mutex<UsageLog>>>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    stats: Option<Arc<Stats>>,
}

impl AdmissionController {
    pub fn new(policies: PolicyTable) -> Self {
        Self::with_runtime(policies, Arc::new(SystemClock), Arc::new(TokioSleeper))
    }

    pub fn with_runtime(
        policies: PolicyTable,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            policies,
            logs: DashMap::new(),
            clock,
            sleeper,
            stats: None,
        }
    }

    pub fn with_stats(mut self, stats: Arc<Stats>) -> Self {
        self.stats = Some(stats);
        self
    }

    fn log_for(&self, endpoint: &str) -> Arc<Mutex<UsageLog>> {
        // Clone the Arc out so no map shard lock is held across an await.
        self.logs.entry(endpoint.to_string()).or_default().clone()
    }

    fn admit(&self, endpoint: &str, log: &mut UsageLog) -> Reservation {
        let now = self.clock.now();
        let window = self.policies.window();
        log.prune(now, window);

        let Some(limit) = self.policies.limit(endpoint) else {
            warn!("No rate limit configured for '{}'; allowing request", endpoint);
            return Reservation::allowed();
        };

        debug!("Rate limit check for '{}': {}/{}", endpoint, log.len(), limit);
        if log.len() < limit as usize {
            Reservation::allowed()
        } else {
            Reservation::denied(log.time_until_slot(now, window))
        }
    }

    fn apply_outcome(
        &self,
        endpoint: &str,
        log: &mut UsageLog,
        outcome: Outcome,
    ) -> Option<Duration> {
        let now = self.clock.now();
        match outcome {
            Outcome::Success => {
                log.record(now);
                Some(self.sample_cooldown(endpoint))
            }
            Outcome::RateLimitedByRemote => {
                let fill = self.policies.limit(endpoint).unwrap_or(1);
                log.saturate(now, fill);
                warn!(
                    "Remote rate limit hit for '{}'; blocking locally for {}s",
                    endpoint,
                    self.policies.window().as_secs()
                );
                None
            }
            Outcome::OtherFailure => None,
        }
    }

    fn sample_cooldown(&self, endpoint: &str) -> Duration {
        self.policies.cooldown_for(endpoint).sample(&mut rand::thread_rng())
    }

    /// Prunes the endpoint's log and reports whether another call fits.
    pub async fn is_within_limit(&self, endpoint: &str) -> bool {
        let log = self.log_for(endpoint);
        let mut guard = log.lock().await;
        self.admit(endpoint, &mut guard).allowed
    }

    pub async fn record_usage(&self, endpoint: &str) {
        let log = self.log_for(endpoint);
        let now = self.clock.now();
        log.lock().await.record(now);
    }

    /// Admission check for callers that drive the remote call themselves.
    /// Pair with [`record_outcome`](Self::record_outcome).
    pub async fn check_and_reserve(&self, endpoint: &str) -> Reservation {
        let log = self.log_for(endpoint);
        let mut guard = log.lock().await;
        let reservation = self.admit(endpoint, &mut guard);
        if !reservation.allowed {
            self.note_local_throttle(endpoint, reservation.retry_after);
        }
        reservation
    }

    /// Records the outcome of an admitted call. Returns the cooldown the
    /// caller should observe, which is only ever set for `Success`.
    pub async fn record_outcome(&self, endpoint: &str, outcome: Outcome) -> Option<Duration> {
        let log = self.log_for(endpoint);
        let mut guard = log.lock().await;
        self.apply_outcome(endpoint, &mut guard, outcome)
    }

    /// Check, run, record and cool down. Never retries and never sleeps on a
    /// failure or a denial.
    pub async fn execute_gated<T, E, Fut>(
        &self,
        endpoint: &str,
        operation: Fut,
    ) -> std::result::Result<T, GateError<E>>
    where
        Fut: Future<Output = std::result::Result<T, E>>,
        E: RemoteFailure + std::error::Error + 'static,
    {
        let log = self.log_for(endpoint);

        let (value, cooldown) = {
            let mut guard = log.lock().await;

            let reservation = self.admit(endpoint, &mut guard);
            if !reservation.allowed {
                self.note_local_throttle(endpoint, reservation.retry_after);
                return Err(GateError::LocallyThrottled {
                    endpoint: endpoint.to_string(),
                    retry_after: reservation.retry_after,
                });
            }

            if let Some(stats) = &self.stats {
                stats.inc_calls_admitted();
            }

            match operation.await {
                Ok(value) => {
                    let cooldown = self.apply_outcome(endpoint, &mut guard, Outcome::Success);
                    (value, cooldown)
                }
                Err(source) if source.is_rate_limited() => {
                    self.apply_outcome(endpoint, &mut guard, Outcome::RateLimitedByRemote);
                    if let Some(stats) = &self.stats {
                        stats.inc_remotely_throttled();
                    }
                    return Err(GateError::RemotelyThrottled {
                        endpoint: endpoint.to_string(),
                        source,
                    });
                }
                Err(source) => {
                    error!("'{}' failed: {}", endpoint, source);
                    if let Some(stats) = &self.stats {
                        stats.inc_operations_failed();
                    }
                    return Err(GateError::OperationFailed {
                        endpoint: endpoint.to_string(),
                        source,
                    });
                }
            }
        };

        if let Some(cooldown) = cooldown {
            info!(
                "'{}' succeeded; cooling down for {:.2}s",
                endpoint,
                cooldown.as_secs_f64()
            );
            if let Some(stats) = &self.stats {
                stats.add_cooldown(cooldown);
            }
            self.sleeper.sleep(cooldown).await;
        }

        Ok(value)
    }

    fn note_local_throttle(&self, endpoint: &str, retry_after: Option<Duration>) {
        match retry_after {
            Some(wait) => warn!(
                "Rate limit exceeded for '{}'; retry in about {:.0}s",
                endpoint,
                wait.as_secs_f64().round()
            ),
            None => warn!("Rate limit exceeded for '{}' with no recorded usage", endpoint),
        }
        if let Some(stats) = &self.stats {
            stats.inc_locally_throttled();
        }
    }

    /// Number of calls currently counted against the endpoint, after pruning.
    pub async fn usage_count(&self, endpoint: &str) -> usize {
        self.usage_timestamps(endpoint).await.len()
    }

    pub async fn usage_timestamps(&self, endpoint: &str) -> Vec<Duration> {
        let log = self.log_for(endpoint);
        let mut guard = log.lock().await;
        guard.prune(self.clock.now(), self.policies.window());
        guard.iter().copied().collect()
    }

    /// `(endpoint, count)` for every endpoint seen so far, sorted by name.
    pub async fn snapshot(&self) -> Vec<(String, usize)> {
        let logs: Vec<(String, Arc<Mutex<UsageLog>>)> = self
            .logs
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let now = self.clock.now();
        let window = self.policies.window();
        let mut counts = Vec::with_capacity(logs.len());
        for (endpoint, log) in logs {
            let mut guard = log.lock().await;
            guard.prune(now, window);
            counts.push((endpoint, guard.len()));
        }
        counts.sort();
        counts
    }
}
