use std::time::Duration;

/// Reconnect delay bounds for the live channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub floor: Duration,
    pub ceiling: Duration,
}

impl BackoffPolicy {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        // A zero floor would never grow; a ceiling below the floor is clamped up.
        let floor = floor.max(Duration::from_millis(1));
        Self {
            floor,
            ceiling: ceiling.max(floor),
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(10))
    }
}

/// Capped exponential backoff without jitter.
///
/// `next_delay` yields the current delay and doubles it for the following
/// attempt, never exceeding the ceiling. `reset` returns to the floor after a
/// successful connection.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            current: policy.floor,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.policy.ceiling);
        self.current = self.current.saturating_mul(2).min(self.policy.ceiling);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.policy.floor;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Backoff, BackoffPolicy};

    #[test]
    fn doubles_up_to_ceiling() {
        let mut b = Backoff::default();
        let delays: Vec<u128> = (0..8).map(|_| b.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 8000, 10_000, 10_000, 10_000]);
    }

    #[test]
    fn monotonic_and_capped_over_many_failures() {
        let policy = BackoffPolicy::new(Duration::from_millis(300), Duration::from_millis(7_000));
        let mut b = Backoff::new(policy);
        let mut last = Duration::ZERO;
        for _ in 0..100 {
            let d = b.next_delay();
            assert!(d >= last, "delay decreased: {d:?} < {last:?}");
            assert!(d <= policy.ceiling);
            last = d;
        }
        assert_eq!(last, policy.ceiling);
    }

    #[test]
    fn reset_returns_to_floor() {
        let mut b = Backoff::default();
        for _ in 0..5 {
            b.next_delay();
        }
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn policy_is_sanitized() {
        let p = BackoffPolicy::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(p.floor, Duration::from_millis(1));
        assert_eq!(p.ceiling, p.floor);
    }
}
