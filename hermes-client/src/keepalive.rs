use std::time::Duration;

/// Tracks idle time since the last network activity.
#[derive(Debug, Clone)]
pub struct KeepAlive {
    interval: Duration,
    last_activity: Duration,
}

impl KeepAlive {
    pub fn new(seconds: u16, now: Duration) -> Self {
        KeepAlive {
            interval: Duration::from_secs(seconds.into()),
            last_activity: now,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn set_interval(&mut self, seconds: u16) {
        self.interval = Duration::from_secs(seconds.into());
    }

    /// Records a successful send or receive.
    pub fn touch(&mut self, now: Duration) {
        self.last_activity = now;
    }

    pub fn idle(&self, now: Duration) -> Duration {
        now.saturating_sub(self.last_activity)
    }

    /// True once the connection has been quiet for a full interval.
    pub fn is_due(&self, now: Duration) -> bool {
        !self.interval.is_zero() && self.idle(now) >= self.interval
    }

    /// Time left before a ping is due, `None` when pinging is disabled.
    pub fn remaining(&self, now: Duration) -> Option<Duration> {
        if self.interval.is_zero() {
            return None;
        }

        Some(self.interval.saturating_sub(self.idle(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_due_after_interval() {
        let mut keep_alive = KeepAlive::new(60, Duration::ZERO);

        assert!(!keep_alive.is_due(Duration::from_secs(59)));
        assert!(keep_alive.is_due(Duration::from_secs(61)));
        assert_eq!(
            keep_alive.remaining(Duration::from_secs(45)),
            Some(Duration::from_secs(15))
        );

        keep_alive.touch(Duration::from_secs(61));
        assert!(!keep_alive.is_due(Duration::from_secs(100)));
    }

    #[test]
    fn test_zero_disables() {
        let keep_alive = KeepAlive::new(0, Duration::ZERO);

        assert!(!keep_alive.is_due(Duration::from_secs(3600)));
        assert_eq!(keep_alive.remaining(Duration::ZERO), None);
    }
}
