use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared between the message handler and the status reporter.
#[derive(Debug)]
pub struct ConsumerStats {
    sent: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    start_time: DateTime<Utc>,
}

impl Default for ConsumerStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsumerStats {
    pub fn new() -> Self {
        Self {
            sent: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            start_time: Utc::now(),
        }
    }

    pub fn record_sent(&self, count: u64) {
        self.sent.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Messages handled per minute since start.
    pub fn rate_per_minute(&self, now: DateTime<Utc>) -> f64 {
        let elapsed_mins =
            now.signed_duration_since(self.start_time).num_milliseconds() as f64 / 60_000.0;
        if elapsed_mins > 0.0 {
            (self.processed() + self.failed()) as f64 / elapsed_mins
        } else {
            0.0
        }
    }

    pub fn display(&self) {
        let now = Utc::now();
        let elapsed = now.signed_duration_since(self.start_time);
        log::info!(
            "Statistics after {}s: sent {}, processed {}, failed {} ({:.1}/min)",
            elapsed.num_seconds(),
            self.sent.load(Ordering::Relaxed),
            self.processed(),
            self.failed(),
            self.rate_per_minute(now)
        );
    }
}
