//! Bounded polling for eventually consistent resources.
//!
//! Every wait in the control plane goes through [`poll_until`]: a fixed
//! attempt budget, a delay that doubles from `initial_delay` up to
//! `max_delay`, and a [`CloudError::Timeout`] naming what was awaited when
//! the budget runs out.

use std::future::Future;
use std::time::Duration;

use opsgrid_core::config::PollSettings;
use tracing::debug;

use crate::error::{CloudError, CloudResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl PollPolicy {
    /// Same delay between every attempt.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
        }
    }

    /// Delay after the given zero-based attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

impl From<PollSettings> for PollPolicy {
    fn from(settings: PollSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms.max(settings.initial_delay_ms)),
        }
    }
}

/// What one check observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState<T> {
    Ready(T),
    Pending,
}

/// Check until it reports `Ready`, a check fails, or attempts run out.
///
/// Check errors are returned immediately; only `Pending` consumes the budget.
pub async fn poll_until<T, F, Fut>(policy: &PollPolicy, what: &str, mut check: F) -> CloudResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = CloudResult<PollState<T>>>,
{
    for attempt in 0..policy.max_attempts {
        match check(attempt).await? {
            PollState::Ready(value) => {
                debug!(what, attempt, "poll satisfied");
                return Ok(value);
            }
            PollState::Pending => {
                debug!(what, attempt, "still waiting");
                if attempt + 1 < policy.max_attempts {
                    let delay = policy.delay_after(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
    Err(CloudError::Timeout {
        what: what.to_string(),
        attempts: policy.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorKind;

    #[test]
    fn delay_doubles_and_caps() {
        let policy = PollPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.delay_after(0), Duration::from_secs(1));
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
        assert_eq!(policy.delay_after(3), Duration::from_secs(5));
        assert_eq!(policy.delay_after(40), Duration::from_secs(5));
    }

    #[test]
    fn fixed_policy_never_grows() {
        let policy = PollPolicy::fixed(20, Duration::from_secs(30));
        assert_eq!(policy.delay_after(0), policy.delay_after(7));
    }

    #[tokio::test]
    async fn ready_on_third_attempt() {
        let policy = PollPolicy::fixed(5, Duration::ZERO);
        let value = poll_until(&policy, "thing", |attempt| async move {
            Ok(if attempt == 2 {
                PollState::Ready(attempt)
            } else {
                PollState::Pending
            })
        })
        .await
        .unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn exhausted_budget_is_timeout() {
        let policy = PollPolicy::fixed(3, Duration::ZERO);
        let err = poll_until(&policy, "cluster fusebit-db-d1", |_| async {
            Ok(PollState::<()>::Pending)
        })
        .await
        .unwrap_err();
        match err {
            CloudError::Timeout { what, attempts } => {
                assert_eq!(what, "cluster fusebit-db-d1");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected timeout, got {other}"),
        }
    }

    #[tokio::test]
    async fn check_error_stops_polling() {
        let policy = PollPolicy::fixed(10, Duration::ZERO);
        let mut calls = 0;
        let err = poll_until(&policy, "x", |_| {
            calls += 1;
            async {
                Err::<PollState<()>, _>(CloudError::provider(
                    "clusters",
                    "describe_cluster",
                    ProviderErrorKind::Other,
                    "denied",
                ))
            }
        })
        .await
        .unwrap_err();
        assert_eq!(err.provider_kind(), Some(ProviderErrorKind::Other));
        assert_eq!(calls, 1);
    }
}
