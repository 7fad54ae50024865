//! Message counters and the recent-activity log behind the stats surface.
//!
//! The message counter sits on every relay hot path, so it is a bare
//! atomic and never takes a lock. The activity log only sees
//! low-frequency lifecycle events (connects, disconnects, resets) and
//! lives behind a mutex.
//!
//! Performance target: record_message < 10ns uncontended.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime};
use tokio::sync::{Mutex, RwLock};

/// Entries retained in the recent-activity log.
pub const ACTIVITY_LOG_CAP: usize = 50;

/// One recorded activity line.
#[derive(Debug, Clone)]
pub struct ActivityEntry {
    pub at: SystemTime,
    pub text: String,
}

/// Cumulative usage counters for one relay process.
///
/// `rate()` is total messages divided by seconds since construction or
/// the last [`reset`](UsageTracker::reset); it reports zero before any
/// time has elapsed.
pub struct UsageTracker {
    messages: AtomicU64,
    window_start: RwLock<Instant>,
    activity: Mutex<VecDeque<ActivityEntry>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self {
            messages: AtomicU64::new(0),
            window_start: RwLock::new(Instant::now()),
            activity: Mutex::new(VecDeque::with_capacity(ACTIVITY_LOG_CAP)),
        }
    }

    /// Count one relayed message. Lock-free, callable from any context.
    pub fn record_message(&self) {
        self.messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Total messages since start or last reset.
    pub fn total(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }

    /// Messages per second over the current window.
    pub async fn rate(&self) -> f64 {
        let started = *self.window_start.read().await;
        let elapsed = started.elapsed().as_secs_f64();
        if elapsed <= f64::EPSILON {
            return 0.0;
        }
        self.total() as f64 / elapsed
    }

    /// Zero the counter, restart the rate window, and clear the log.
    pub async fn reset(&self) {
        self.messages.store(0, Ordering::Relaxed);
        {
            let mut started = self.window_start.write().await;
            *started = Instant::now();
        }
        let mut log = self.activity.lock().await;
        log.clear();
    }

    /// Start of the current rate window.
    pub async fn started_at(&self) -> Instant {
        *self.window_start.read().await
    }

    /// Append a line to the bounded activity log.
    pub async fn record_activity(&self, text: impl Into<String>) {
        let mut log = self.activity.lock().await;
        if log.len() == ACTIVITY_LOG_CAP {
            log.pop_front();
        }
        log.push_back(ActivityEntry {
            at: SystemTime::now(),
            text: text.into(),
        });
    }

    /// Most recent activity line, if any.
    pub async fn last_activity(&self) -> Option<ActivityEntry> {
        let log = self.activity.lock().await;
        log.back().cloned()
    }

    /// The retained activity log, oldest first.
    pub async fn recent_activity(&self) -> Vec<ActivityEntry> {
        let log = self.activity.lock().await;
        log.iter().cloned().collect()
    }
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}
