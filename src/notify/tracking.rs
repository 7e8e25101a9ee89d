//! In-memory flood control for error notifications.
//!
//! Counters are keyed by [`ErrorCategory`] and windowed by UTC hour and day index
//! (`now_millis / HOUR_MS`, `now_millis / DAY_MS`). A counter whose window has rolled over is
//! treated as zero and pruned on the next access. Nothing is persisted; a restart clears it all.

use super::ErrorCategory;
use std::collections::HashMap;

pub const HOUR_MS: u64 = 60 * 60 * 1000;
pub const DAY_MS: u64 = 24 * HOUR_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WindowCount {
    window: u64,
    count: u32,
}

/// Snapshot of one category's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CategoryStats {
    pub hourly: u32,
    pub daily: u32,
    pub suppressed: u64,
    pub last_sent_millis: Option<u64>,
}

/// Sent/suppressed counters for every category.
#[derive(Debug, Default)]
pub struct ErrorTracking {
    last_sent: HashMap<ErrorCategory, u64>,
    hourly: HashMap<ErrorCategory, WindowCount>,
    daily: HashMap<ErrorCategory, WindowCount>,
    suppressed: HashMap<ErrorCategory, u64>,
}

impl ErrorTracking {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve one notification slot for `category`.
    ///
    /// Returns `false` (and counts a suppression) when either the hourly or the daily cap is
    /// already reached; otherwise bumps both counters and records `now_millis` as last sent.
    pub fn try_acquire(
        &mut self,
        category: ErrorCategory,
        now_millis: u64,
        max_per_hour: u32,
        max_per_day: u32,
    ) -> bool {
        self.prune(now_millis);
        let hour = now_millis / HOUR_MS;
        let day = now_millis / DAY_MS;

        let hourly = current(self.hourly.get(&category), hour);
        let daily = current(self.daily.get(&category), day);
        if hourly >= max_per_hour || daily >= max_per_day {
            *self.suppressed.entry(category).or_default() += 1;
            return false;
        }

        self.hourly.insert(category, WindowCount { window: hour, count: hourly + 1 });
        self.daily.insert(category, WindowCount { window: day, count: daily + 1 });
        self.last_sent.insert(category, now_millis);
        true
    }

    pub fn stats(&self, category: ErrorCategory, now_millis: u64) -> CategoryStats {
        CategoryStats {
            hourly: current(self.hourly.get(&category), now_millis / HOUR_MS),
            daily: current(self.daily.get(&category), now_millis / DAY_MS),
            suppressed: self.suppressed.get(&category).copied().unwrap_or(0),
            last_sent_millis: self.last_sent.get(&category).copied(),
        }
    }

    /// Drop counters whose window has rolled over.
    fn prune(&mut self, now_millis: u64) {
        let hour = now_millis / HOUR_MS;
        let day = now_millis / DAY_MS;
        self.hourly.retain(|_, w| w.window == hour);
        self.daily.retain(|_, w| w.window == day);
    }
}

fn current(entry: Option<&WindowCount>, window: u64) -> u32 {
    match entry {
        Some(w) if w.window == window => w.count,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: u64 = 1_700_000_000_000 - (1_700_000_000_000 % DAY_MS);

    #[test]
    fn hourly_cap_suppresses_and_counts() {
        let mut tracking = ErrorTracking::new();
        assert!(tracking.try_acquire(ErrorCategory::Webhook, START, 1, 10));
        assert!(!tracking.try_acquire(ErrorCategory::Webhook, START + 1_000, 1, 10));
        let stats = tracking.stats(ErrorCategory::Webhook, START + 1_000);
        assert_eq!(stats.hourly, 1);
        assert_eq!(stats.daily, 1);
        assert_eq!(stats.suppressed, 1);
        assert_eq!(stats.last_sent_millis, Some(START));
    }

    #[test]
    fn categories_are_independent() {
        let mut tracking = ErrorTracking::new();
        assert!(tracking.try_acquire(ErrorCategory::Webhook, START, 1, 10));
        assert!(tracking.try_acquire(ErrorCategory::GraphQl, START, 1, 10));
    }

    #[test]
    fn hour_rollover_resets_hourly_but_not_daily() {
        let mut tracking = ErrorTracking::new();
        assert!(tracking.try_acquire(ErrorCategory::Network, START, 1, 2));
        assert!(!tracking.try_acquire(ErrorCategory::Network, START + 10, 1, 2));
        assert!(tracking.try_acquire(ErrorCategory::Network, START + HOUR_MS, 1, 2));
        // daily cap of 2 reached
        assert!(!tracking.try_acquire(ErrorCategory::Network, START + 2 * HOUR_MS, 1, 2));
        let stats = tracking.stats(ErrorCategory::Network, START + 2 * HOUR_MS);
        assert_eq!(stats.hourly, 0);
        assert_eq!(stats.daily, 2);
        assert_eq!(stats.suppressed, 2);
    }

    #[test]
    fn day_rollover_resets_everything_but_suppressed() {
        let mut tracking = ErrorTracking::new();
        assert!(tracking.try_acquire(ErrorCategory::Unknown, START, 1, 1));
        assert!(!tracking.try_acquire(ErrorCategory::Unknown, START + 1, 1, 1));
        assert!(tracking.try_acquire(ErrorCategory::Unknown, START + DAY_MS, 1, 1));
        let stats = tracking.stats(ErrorCategory::Unknown, START + DAY_MS);
        assert_eq!((stats.hourly, stats.daily, stats.suppressed), (1, 1, 1));
    }

    #[test]
    fn zero_caps_never_send() {
        let mut tracking = ErrorTracking::new();
        assert!(!tracking.try_acquire(ErrorCategory::Unknown, START, 0, 10));
        assert!(!tracking.try_acquire(ErrorCategory::Unknown, START, 10, 0));
    }
}
