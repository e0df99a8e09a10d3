//! Retry policy: attempt budget, interval function, conditions, hooks.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;
use crate::response::Response;

/// Decides whether an outcome should be retried. Any condition
/// returning true triggers a retry.
pub type RetryCondition = Arc<dyn Fn(Option<&Response>, Option<&Error>) -> bool + Send + Sync>;

/// Computes the sleep before attempt `attempt + 1`.
pub type RetryInterval = Arc<dyn Fn(Option<&Response>, u32) -> Duration + Send + Sync>;

/// Invoked before each retry sleep with the outcome and attempt number.
pub type RetryHook = Arc<dyn Fn(Option<&Response>, u32) + Send + Sync>;

/// Retry configuration. Defaults to no retries with an empty condition
/// set; conditions must be added explicitly.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Maximum retry count; negative means unbounded.
    pub max_retries: i32,
    pub interval: RetryInterval,
    pub conditions: Vec<RetryCondition>,
    pub hooks: Vec<RetryHook>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            interval: fixed_interval(Duration::from_millis(100)),
            conditions: Vec::new(),
            hooks: Vec::new(),
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("conditions", &self.conditions.len())
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl RetryPolicy {
    /// True when `attempt` retries have already happened and another is
    /// still allowed.
    pub fn allows_retry(&self, retries_done: u32) -> bool {
        self.max_retries < 0 || retries_done < self.max_retries as u32
    }

    /// True when any condition votes to retry this outcome.
    pub fn should_retry(&self, response: Option<&Response>, error: Option<&Error>) -> bool {
        self.conditions.iter().any(|c| c(response, error))
    }
}

/// Fixed sleep between attempts.
pub fn fixed_interval(interval: Duration) -> RetryInterval {
    Arc::new(move |_, _| interval)
}

/// Capped exponential backoff with jitter over `[min, max]`.
///
/// The base doubles per attempt and is capped at `max`; the actual
/// sleep is `base/2 + random(0..base/2)`, so it always lands in
/// `[min/2, max]`.
pub fn backoff_interval(min: Duration, max: Duration) -> RetryInterval {
    Arc::new(move |_, attempt| {
        let shift = attempt.min(30);
        let base = min
            .saturating_mul(1u32 << shift.min(31))
            .min(max)
            .max(min);
        let half = base / 2;
        let jitter_ns = if half.as_nanos() == 0 {
            0
        } else {
            let mut raw = [0u8; 8];
            let _ = getrandom::getrandom(&mut raw);
            u64::from_le_bytes(raw) % half.as_nanos() as u64
        };
        half + Duration::from_nanos(jitter_ns)
    })
}

/// Condition: retry on any transport-level error (no response at all).
pub fn retry_on_error() -> RetryCondition {
    Arc::new(|_, error| error.is_some())
}

/// Condition: retry on network-kind errors.
pub fn retry_on_network_error() -> RetryCondition {
    Arc::new(|_, error| {
        error
            .map(|e| e.kind() == crate::error::ErrorKind::Network)
            .unwrap_or(false)
    })
}

/// Condition: retry on 5xx responses.
pub fn retry_on_server_error() -> RetryCondition {
    Arc::new(|response, _| response.map(|r| r.status >= 500).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_never_retries() {
        let policy = RetryPolicy::default();
        assert!(!policy.allows_retry(0));
        assert!(!policy.should_retry(None, Some(&Error::network("x"))));
    }

    #[test]
    fn negative_max_is_unbounded() {
        let policy = RetryPolicy {
            max_retries: -1,
            ..Default::default()
        };
        assert!(policy.allows_retry(0));
        assert!(policy.allows_retry(1_000_000));
    }

    #[test]
    fn bounded_budget() {
        let policy = RetryPolicy {
            max_retries: 2,
            ..Default::default()
        };
        assert!(policy.allows_retry(0));
        assert!(policy.allows_retry(1));
        assert!(!policy.allows_retry(2));
    }

    #[test]
    fn any_condition_triggers() {
        let policy = RetryPolicy {
            conditions: vec![
                Arc::new(|_, _| false) as RetryCondition,
                retry_on_network_error(),
            ],
            ..Default::default()
        };
        assert!(policy.should_retry(None, Some(&Error::network("refused"))));
        assert!(!policy.should_retry(None, Some(&Error::tls("bad"))));
    }

    #[test]
    fn backoff_stays_within_bounds() {
        let interval = backoff_interval(Duration::from_millis(100), Duration::from_millis(500));
        for attempt in 0..10 {
            let sleep = interval(None, attempt);
            assert!(sleep >= Duration::from_millis(50), "attempt {attempt}: {sleep:?}");
            assert!(sleep <= Duration::from_millis(500), "attempt {attempt}: {sleep:?}");
        }
    }

    #[test]
    fn fixed_interval_is_constant() {
        let interval = fixed_interval(Duration::from_millis(250));
        assert_eq!(interval(None, 0), Duration::from_millis(250));
        assert_eq!(interval(None, 9), Duration::from_millis(250));
    }
}
