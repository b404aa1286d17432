//! Bounded polling. Every blocking wait in the harness goes through here.

use crate::error::HarnessError;
use std::future::Future;
use std::time::{Duration, Instant};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay before the second attempt.
    pub interval: Duration,
    /// Upper bound for the delay when backing off; equal to `interval` for fixed polling.
    pub max_interval: Duration,
    /// Total time after which the wait fails.
    pub ceiling: Duration,
}

impl PollPolicy {
    pub fn fixed(interval: Duration, ceiling: Duration) -> Self {
        PollPolicy {
            interval,
            max_interval: interval,
            ceiling,
        }
    }

    /// Double the delay after each miss, up to `max_interval`.
    pub fn with_backoff(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval.max(self.interval);
        self
    }

    fn next_delay(&self, current: Duration) -> Duration {
        (current * 2).min(self.max_interval)
    }
}

/// Result of one attempt.
pub enum Attempt<T> {
    Ready(T),
    Retry(String),
}

/// Run `check` until it is ready, fails, or the policy's ceiling passes.
pub async fn poll_until<T, F, Fut>(policy: &PollPolicy, what: &str, mut check: F) -> Result<T, HarnessError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Attempt<T>, HarnessError>>,
{
    let start = Instant::now();
    let mut delay = policy.interval;
    loop {
        let last = match check().await? {
            Attempt::Ready(v) => return Ok(v),
            Attempt::Retry(reason) => reason,
        };
        let waited = start.elapsed();
        if waited >= policy.ceiling {
            return Err(HarnessError::Timeout {
                what: what.to_string(),
                waited,
                last,
            });
        }
        tracing::debug!(what, reason = %last, "not ready, retrying");
        tokio::time::sleep(delay.min(policy.ceiling.saturating_sub(waited))).await;
        delay = policy.next_delay(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn returns_once_ready() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = PollPolicy::fixed(Duration::from_millis(5), Duration::from_secs(5));
        let c = calls.clone();
        let v = poll_until(&policy, "third attempt", move || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) >= 2 {
                    Ok(Attempt::Ready(7))
                } else {
                    Ok(Attempt::Retry("not yet".into()))
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(v, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn times_out_with_last_reason() {
        let policy = PollPolicy::fixed(Duration::from_millis(10), Duration::from_millis(50));
        let err = poll_until::<(), _, _>(&policy, "never", || async { Ok(Attempt::Retry("closed".into())) })
            .await
            .unwrap_err();
        match err {
            HarnessError::Timeout { what, last, waited } => {
                assert_eq!(what, "never");
                assert_eq!(last, "closed");
                assert!(waited >= Duration::from_millis(50));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn check_errors_abort_immediately() {
        let policy = PollPolicy::fixed(Duration::from_millis(10), Duration::from_secs(5));
        let err = poll_until::<(), _, _>(&policy, "abort", || async {
            Err(HarnessError::Config("boom".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = PollPolicy::fixed(Duration::from_millis(100), Duration::from_secs(1))
            .with_backoff(Duration::from_millis(300));
        let d = policy.next_delay(Duration::from_millis(100));
        assert_eq!(d, Duration::from_millis(200));
        assert_eq!(policy.next_delay(d), Duration::from_millis(300));
        let fixed = PollPolicy::fixed(Duration::from_millis(250), Duration::from_secs(1));
        assert_eq!(fixed.next_delay(Duration::from_millis(250)), Duration::from_millis(250));
    }
}
