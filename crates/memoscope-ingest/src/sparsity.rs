//! Adaptive sparsity window: the continuous watcher doesn't reconcile
//! every settled file, it samples every Nth one, where N adapts to how
//! fast files are arriving versus how fast they're being synced (`4.D`).
//!
//! Rolling windows of inter-arrival times and sync durations feed
//! `rate = pending/sec ÷ sync/sec`, `N = max(1, ceil(sparsity_factor *
//! rate))`, doubled on battery, gated on `min_samples = max(3,
//! window_size/3)` observations in both windows before any of this kicks
//! in.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

const MAX_INTERVAL: Duration = Duration::from_secs(60);
const BATTERY_CHECK_INTERVAL: Duration = Duration::from_secs(60);

pub struct SparsityTracker {
    pending_times: VecDeque<Instant>,
    sync_times: VecDeque<Duration>,
    window_size: usize,
    sparsity_factor: f64,
    sparsity_window: u64,
    file_count: u64,
    last_battery_check: Option<Instant>,
    cached_on_battery: bool,
    battery_probe: Box<dyn Fn() -> bool + Send + Sync>,
}

impl SparsityTracker {
    pub fn new(sparsity_factor: f64, window_size: usize) -> Self {
        Self::with_battery_probe(sparsity_factor, window_size, Box::new(detect_on_battery))
    }

    pub fn with_battery_probe(
        sparsity_factor: f64,
        window_size: usize,
        battery_probe: Box<dyn Fn() -> bool + Send + Sync>,
    ) -> Self {
        Self {
            pending_times: VecDeque::with_capacity(window_size),
            sync_times: VecDeque::with_capacity(window_size),
            window_size,
            sparsity_factor,
            sparsity_window: 12,
            file_count: 0,
            last_battery_check: None,
            cached_on_battery: false,
            battery_probe,
        }
    }

    pub fn current_window(&self) -> u64 {
        self.sparsity_window
    }

    pub fn record_pending_event(&mut self, at: Instant) {
        if self.pending_times.len() == self.window_size {
            self.pending_times.pop_front();
        }
        self.pending_times.push_back(at);
    }

    pub fn record_sync(&mut self, duration: Duration) {
        if self.sync_times.len() == self.window_size {
            self.sync_times.pop_front();
        }
        self.sync_times.push_back(duration);
    }

    /// `4.D`: "every Nth settled file is reconciled, where N is the current
    /// sparsity window". Advances `file_count` and reports whether this call
    /// lands on the sampled slot.
    pub fn should_process(&mut self) -> bool {
        self.file_count += 1;
        self.file_count % self.sparsity_window == 0
    }

    /// Recomputes `sparsity_window` from the rolling windows, gated on
    /// `min_samples = max(3, window_size / 3)` observations in both.
    pub fn update(&mut self, now: Instant) {
        let min_samples = (self.window_size / 3).max(3);
        if self.pending_times.len() < min_samples || self.sync_times.len() < min_samples {
            return;
        }

        let filtered_intervals: Vec<Duration> = self
            .pending_times
            .iter()
            .zip(self.pending_times.iter().skip(1))
            .map(|(a, b)| *b - *a)
            .filter(|d| *d <= MAX_INTERVAL)
            .collect();

        let pending_per_sec = if filtered_intervals.is_empty() {
            0.0
        } else {
            let avg = filtered_intervals.iter().sum::<Duration>().as_secs_f64() / filtered_intervals.len() as f64;
            if avg > 0.0 { 1.0 / avg } else { 0.0 }
        };

        let sync_total: f64 = self.sync_times.iter().map(|d| d.as_secs_f64()).sum();
        let sync_per_sec = if sync_total > 0.0 {
            self.sync_times.len() as f64 / sync_total
        } else {
            0.0
        };

        if pending_per_sec <= 0.0 || sync_per_sec <= 0.0 {
            return;
        }

        let rate = pending_per_sec / sync_per_sec;
        let mut new_window = (self.sparsity_factor * rate).ceil().max(1.0) as u64;

        if self
            .last_battery_check
            .map(|t| now.duration_since(t) >= BATTERY_CHECK_INTERVAL)
            .unwrap_or(true)
        {
            self.last_battery_check = Some(now);
            self.cached_on_battery = (self.battery_probe)();
        }
        if self.cached_on_battery {
            new_window *= 2;
        }

        self.sparsity_window = new_window;
    }
}

/// Falls back to "not on battery" when the platform has no battery sensor.
fn detect_on_battery() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> SparsityTracker {
        SparsityTracker::with_battery_probe(3.0, 10, Box::new(|| false))
    }

    #[test]
    fn starts_at_default_window_of_twelve() {
        assert_eq!(tracker().current_window(), 12);
    }

    #[test]
    fn below_min_samples_does_not_recompute() {
        let mut t = tracker();
        let now = Instant::now();
        t.record_pending_event(now);
        t.record_sync(Duration::from_millis(10));
        t.update(now);
        assert_eq!(t.current_window(), 12);
    }

    #[test]
    fn fast_arrivals_with_slow_sync_raises_window() {
        let mut t = tracker();
        let base = Instant::now();
        for i in 0..10u32 {
            t.record_pending_event(base + Duration::from_millis(100 * i as u64));
        }
        for _ in 0..10 {
            t.record_sync(Duration::from_secs(5));
        }
        t.update(base + Duration::from_secs(1));
        assert!(t.current_window() > 1);
    }

    #[test]
    fn battery_doubles_the_window() {
        let mut with_battery = SparsityTracker::with_battery_probe(3.0, 10, Box::new(|| true));
        let mut without_battery = tracker();
        let base = Instant::now();
        for i in 0..10u32 {
            with_battery.record_pending_event(base + Duration::from_millis(100 * i as u64));
            without_battery.record_pending_event(base + Duration::from_millis(100 * i as u64));
        }
        for _ in 0..10 {
            with_battery.record_sync(Duration::from_secs(5));
            without_battery.record_sync(Duration::from_secs(5));
        }
        with_battery.update(base + Duration::from_secs(1));
        without_battery.update(base + Duration::from_secs(1));
        assert_eq!(with_battery.current_window(), without_battery.current_window() * 2);
    }

    #[test]
    fn should_process_samples_every_nth_call() {
        let mut t = tracker();
        let mut hits = 0;
        for _ in 0..24 {
            if t.should_process() {
                hits += 1;
            }
        }
        assert_eq!(hits, 2);
    }
}
