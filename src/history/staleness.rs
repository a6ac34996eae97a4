/// Idle detection for the history notification stream
use tokio::time::{Duration, Instant};

/// Tracks when the last history record arrived
///
/// The monitor reports nothing until the first record is seen, so a device
/// that takes a while to start streaming is never cut off early.
#[derive(Debug, Clone, Copy, Default)]
pub struct StalenessMonitor {
    last_arrival: Option<Instant>,
}

impl StalenessMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_activity(&mut self, now: Instant) {
        self.last_arrival = Some(now);
    }

    /// True once more than `threshold` has passed since the last arrival
    pub fn is_stale(&self, now: Instant, threshold: Duration) -> bool {
        match self.last_arrival {
            None => false,
            Some(last) => now.saturating_duration_since(last) > threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_stale_without_activity() {
        let monitor = StalenessMonitor::new();
        let later = Instant::now() + Duration::from_secs(3600);
        assert!(!monitor.is_stale(later, Duration::from_secs(10)));
    }

    #[test]
    fn stale_only_after_threshold_is_exceeded() {
        let start = Instant::now();
        let threshold = Duration::from_secs(10);
        let mut monitor = StalenessMonitor::new();
        monitor.mark_activity(start);

        assert!(!monitor.is_stale(start + Duration::from_secs(5), threshold));
        assert!(!monitor.is_stale(start + threshold, threshold));
        assert!(monitor.is_stale(start + Duration::from_secs(11), threshold));
    }

    #[test]
    fn activity_resets_the_timer() {
        let start = Instant::now();
        let threshold = Duration::from_secs(10);
        let mut monitor = StalenessMonitor::new();
        monitor.mark_activity(start);
        monitor.mark_activity(start + Duration::from_secs(9));

        assert!(!monitor.is_stale(start + Duration::from_secs(15), threshold));
        assert!(monitor.is_stale(start + Duration::from_secs(20), threshold));
    }
}
