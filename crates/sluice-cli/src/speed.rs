use std::time::{Duration, Instant};

/// Minimum window over which the instantaneous rate is computed.
const INSTANT_WINDOW: Duration = Duration::from_millis(500);

/// Tracks instantaneous (last ≥500 ms window) and cumulative throughput.
pub struct SpeedTracker {
    started: Instant,
    total_bytes: u64,
    window_started: Instant,
    window_bytes: u64,
    instant_bps: f64,
}

impl SpeedTracker {
    pub fn new() -> Self {
        Self::new_at(Instant::now())
    }

    fn new_at(now: Instant) -> Self {
        Self {
            started: now,
            total_bytes: 0,
            window_started: now,
            window_bytes: 0,
            instant_bps: 0.0,
        }
    }

    pub fn on_bytes(&mut self, n: u64) {
        self.on_bytes_at(n, Instant::now());
    }

    fn on_bytes_at(&mut self, n: u64, now: Instant) {
        self.total_bytes += n;
        self.window_bytes += n;
        let elapsed = now.duration_since(self.window_started);
        if elapsed >= INSTANT_WINDOW {
            self.instant_bps = self.window_bytes as f64 / elapsed.as_secs_f64();
            self.window_started = now;
            self.window_bytes = 0;
        }
    }

    /// Rate over the most recent completed window. Zero until the first
    /// window closes.
    pub fn instant_bps(&self) -> f64 {
        self.instant_bps
    }

    pub fn average_bps(&self) -> f64 {
        self.average_at(Instant::now())
    }

    fn average_at(&self, now: Instant) -> f64 {
        let secs = now.duration_since(self.started).as_secs_f64();
        if secs > 0.0 {
            self.total_bytes as f64 / secs
        } else {
            0.0
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}

impl Default for SpeedTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_rate_waits_for_a_full_window() {
        let start = Instant::now();
        let mut tracker = SpeedTracker::new_at(start);

        tracker.on_bytes_at(1000, start + Duration::from_millis(100));
        assert_eq!(tracker.instant_bps(), 0.0);

        // Window closes at >= 500 ms: 2000 bytes over 600 ms.
        tracker.on_bytes_at(1000, start + Duration::from_millis(600));
        let bps = tracker.instant_bps();
        assert!((bps - 2000.0 / 0.6).abs() < 1.0, "got {bps}");
    }

    #[test]
    fn window_resets_after_closing() {
        let start = Instant::now();
        let mut tracker = SpeedTracker::new_at(start);
        tracker.on_bytes_at(500, start + Duration::from_millis(500));
        let first = tracker.instant_bps();

        // A much faster second window should replace the rate.
        tracker.on_bytes_at(4000, start + Duration::from_millis(1000));
        assert!(tracker.instant_bps() > first);
    }

    #[test]
    fn average_covers_the_whole_transfer() {
        let start = Instant::now();
        let mut tracker = SpeedTracker::new_at(start);
        tracker.on_bytes_at(1000, start + Duration::from_millis(250));
        tracker.on_bytes_at(1000, start + Duration::from_millis(750));

        let avg = tracker.average_at(start + Duration::from_secs(1));
        assert!((avg - 2000.0).abs() < 1.0, "got {avg}");
        assert_eq!(tracker.total_bytes(), 2000);
    }
}
