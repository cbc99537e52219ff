//! Rolling one-second bitrate window shared by host tracks and viewer
//! outbound video counters.

use std::time::{Duration, Instant};

/// Accumulates bytes and reports a bytes/second rate once per second,
/// rebasing the anchor on each report. Between reports, `add_bytes` just
/// accumulates and returns `None`.
pub struct BitrateWindow {
    window_start: Instant,
    anchor_bytes: u64,
    total_bytes: u64,
}

impl BitrateWindow {
    #[must_use]
    pub fn new() -> Self {
        Self {
            window_start: Instant::now(),
            anchor_bytes: 0,
            total_bytes: 0,
        }
    }

    /// Add `n` bytes to the running total. Returns the bytes/second rate
    /// since the last rebase once at least one second has elapsed,
    /// otherwise `None`. A negative diff (a counter reset) clamps to 0
    /// rather than reporting a bogus negative rate.
    pub fn add_bytes(&mut self, n: u64) -> Option<u64> {
        self.total_bytes = self.total_bytes.saturating_add(n);

        let elapsed = self.window_start.elapsed();
        if elapsed < Duration::from_secs(1) {
            return None;
        }

        let diff = self.total_bytes.saturating_sub(self.anchor_bytes);
        let secs = elapsed.as_secs_f64().max(1.0);
        let rate = (diff as f64 / secs).round() as u64;

        self.anchor_bytes = self.total_bytes;
        self.window_start = Instant::now();

        Some(rate)
    }
}

impl Default for BitrateWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_nothing_before_one_second_elapses() {
        let mut window = BitrateWindow::new();
        assert_eq!(window.add_bytes(1000), None);
    }

    #[test]
    fn rebases_anchor_after_reporting() {
        let mut window = BitrateWindow {
            window_start: Instant::now() - Duration::from_millis(1100),
            anchor_bytes: 0,
            total_bytes: 0,
        };
        let rate = window.add_bytes(2000).expect("window should have elapsed");
        assert!(rate > 0);
        assert_eq!(window.anchor_bytes, window.total_bytes);
    }
}
