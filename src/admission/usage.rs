use std::collections::VecDeque;
use std::time::Duration;

/// Timestamps (since the UNIX epoch) of successful calls for one endpoint,
/// oldest first.
#[derive(Debug, Default, Clone)]
pub struct UsageLog {
    entries: VecDeque<Duration>,
}

impl UsageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry with `now - ts >= window`. An entry exactly one
    /// window old is already outside it.
    pub fn prune(&mut self, now: Duration, window: Duration) {
        while let Some(front) = self.entries.front() {
            if now.saturating_sub(*front) >= window {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn record(&mut self, at: Duration) {
        self.entries.push_back(at);
    }

    /// Replace the log with `count` entries stamped `now`, so the endpoint
    /// reads as full for one whole window.
    pub fn saturate(&mut self, now: Duration, count: u32) {
        self.entries.clear();
        self.entries.extend(std::iter::repeat(now).take(count as usize));
    }

    pub fn oldest(&self) -> Option<Duration> {
        self.entries.front().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Duration> {
        self.entries.iter()
    }

    /// Time until the oldest entry leaves the window, floored at zero.
    /// `None` when there is nothing to age out.
    pub fn time_until_slot(&self, now: Duration, window: Duration) -> Option<Duration> {
        self.oldest()
            .map(|oldest| window.saturating_sub(now.saturating_sub(oldest)))
    }
}
