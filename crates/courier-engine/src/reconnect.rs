use std::time::Duration;

use rand::Rng;

/// Backoff schedule applied between a non-terminal close and the next
/// handshake.
#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
    /// Consecutive failed attempts tolerated before giving up. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.2,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Reconnect immediately, forever.
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_factor: 0.0,
            max_attempts: None,
        }
    }

    /// Whether attempt number `attempt` (1-based) is still within budget.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt <= max)
    }

    /// Delay before attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // Exponential backoff: base * 2^(attempt - 1)
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let exp_delay = self.base_delay.as_millis() as f64 * 2.0_f64.powi(exponent);
        let capped = exp_delay.min(self.max_delay.as_millis() as f64);
        if capped <= 0.0 {
            return Duration::ZERO;
        }

        // delay * (1 ± jitter_factor)
        let jitter_range = capped * self.jitter_factor.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}

/// Tracks consecutive attempts since the last successful open.
#[derive(Debug, Default)]
pub struct ReconnectBudget {
    attempts: u32,
}

impl ReconnectBudget {
    /// Claim the next attempt number, or `None` when the policy is exhausted.
    pub fn next_attempt(&mut self, policy: &ReconnectPolicy) -> Option<u32> {
        let attempt = self.attempts.saturating_add(1);
        if !policy.allows(attempt) {
            return None;
        }
        self.attempts = attempt;
        Some(attempt)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(base_ms: u64, max_ms: u64) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
            jitter_factor: 0.0,
            max_attempts: None,
        }
    }

    #[test]
    fn delays_double_then_cap() {
        let policy = no_jitter(100, 500);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = ReconnectPolicy {
            jitter_factor: 0.2,
            ..no_jitter(1000, 60_000)
        };
        for _ in 0..200 {
            let d = policy.delay_for(1).as_millis();
            assert!((800..=1200).contains(&d), "delay {d} out of range");
        }
    }

    #[test]
    fn immediate_policy_never_waits() {
        let policy = ReconnectPolicy::immediate();
        assert_eq!(policy.delay_for(1), Duration::ZERO);
        assert_eq!(policy.delay_for(10), Duration::ZERO);
        assert!(policy.allows(u32::MAX));
    }

    #[test]
    fn budget_exhausts_and_resets() {
        let policy = ReconnectPolicy {
            max_attempts: Some(2),
            ..no_jitter(0, 0)
        };
        let mut budget = ReconnectBudget::default();
        assert_eq!(budget.next_attempt(&policy), Some(1));
        assert_eq!(budget.next_attempt(&policy), Some(2));
        assert_eq!(budget.next_attempt(&policy), None);
        assert_eq!(budget.attempts(), 2);

        budget.reset();
        assert_eq!(budget.next_attempt(&policy), Some(1));
    }
}
