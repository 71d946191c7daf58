use std::collections::HashMap;

/// Consecutive failed exit placements per position
#[derive(Debug, Clone)]
pub struct ExitFailureTracker {
    alert_threshold: u32,
    failures: HashMap<i64, u32>,
}

impl ExitFailureTracker {
    pub fn new(alert_threshold: u32) -> Self {
        Self {
            alert_threshold,
            failures: HashMap::new(),
        }
    }

    /// Count a failure and return the new streak length
    pub fn record_failure(&mut self, position_id: i64) -> u32 {
        let count = self.failures.entry(position_id).or_insert(0);
        *count += 1;
        *count
    }

    pub fn record_success(&mut self, position_id: i64) {
        self.failures.remove(&position_id);
    }

    pub fn failures(&self, position_id: i64) -> u32 {
        self.failures.get(&position_id).copied().unwrap_or(0)
    }

    /// Alert at the threshold and at every multiple of it; 0 disables alerts
    pub fn should_alert(&self, count: u32) -> bool {
        self.alert_threshold > 0 && count > 0 && count % self.alert_threshold == 0
    }

    /// Drop counters for positions that are no longer open
    pub fn retain(&mut self, open_ids: &[i64]) {
        self.failures.retain(|id, _| open_ids.contains(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_at_threshold_and_multiples() {
        let mut tracker = ExitFailureTracker::new(3);

        let alerts: Vec<bool> = (0..7)
            .map(|_| {
                let count = tracker.record_failure(1);
                tracker.should_alert(count)
            })
            .collect();

        assert_eq!(alerts, vec![false, false, true, false, false, true, false]);
        assert_eq!(tracker.failures(1), 7);
    }

    #[test]
    fn test_success_resets_streak() {
        let mut tracker = ExitFailureTracker::new(2);
        tracker.record_failure(1);
        tracker.record_success(1);
        assert_eq!(tracker.failures(1), 0);
        assert_eq!(tracker.record_failure(1), 1);
    }

    #[test]
    fn test_zero_threshold_never_alerts() {
        let mut tracker = ExitFailureTracker::new(0);
        let count = tracker.record_failure(1);
        assert!(!tracker.should_alert(count));
    }

    #[test]
    fn test_retain_drops_closed_positions() {
        let mut tracker = ExitFailureTracker::new(5);
        tracker.record_failure(1);
        tracker.record_failure(2);
        tracker.retain(&[2]);
        assert_eq!(tracker.failures(1), 0);
        assert_eq!(tracker.failures(2), 1);
    }
}
