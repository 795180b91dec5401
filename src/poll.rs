//! Bounded, cancellable polling.
//!
//! The viewer frame is inserted by the page's own scripts some time after
//! load, so extraction is retried on a fixed interval until it succeeds, the
//! attempt budget runs out, or navigation cancels the wait.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Total number of attempts, including the first
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2000),
            max_attempts: 10,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Found { value: T, attempts: u32 },
    Exhausted { attempts: u32 },
    Cancelled { attempts: u32 },
}

impl<T> PollOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Found { attempts, .. }
            | Self::Exhausted { attempts }
            | Self::Cancelled { attempts } => *attempts,
        }
    }
}

/// Run `attempt` until it yields a value.
///
/// The first attempt runs immediately; later ones wait `policy.interval`.
/// Cancellation is checked before every attempt and during every wait.
pub async fn poll_until<T, F, Fut>(
    policy: PollPolicy,
    cancel: &CancellationToken,
    mut attempt: F,
) -> PollOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let mut attempts = 0;

    while attempts < policy.max_attempts {
        if attempts > 0 {
            tokio::select! {
                _ = cancel.cancelled() => return PollOutcome::Cancelled { attempts },
                _ = tokio::time::sleep(policy.interval) => {}
            }
        }
        if cancel.is_cancelled() {
            return PollOutcome::Cancelled { attempts };
        }

        attempts += 1;
        trace!(attempt = attempts, max = policy.max_attempts, "Polling");
        if let Some(value) = attempt(attempts).await {
            return PollOutcome::Found { value, attempts };
        }
    }

    PollOutcome::Exhausted { attempts }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast(max_attempts: u32) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(5),
            max_attempts,
        }
    }

    #[tokio::test]
    async fn stops_at_first_success() {
        let cancel = CancellationToken::new();
        let outcome = poll_until(fast(10), &cancel, |n| async move { (n == 3).then_some(n) }).await;
        assert_eq!(outcome, PollOutcome::Found { value: 3, attempts: 3 });
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let cancel = CancellationToken::new();
        let mut calls = 0;
        let outcome: PollOutcome<()> = poll_until(fast(4), &cancel, |_| {
            calls += 1;
            async { None }
        })
        .await;
        assert_eq!(outcome, PollOutcome::Exhausted { attempts: 4 });
        assert_eq!(calls, 4);
    }

    #[tokio::test]
    async fn cancelled_before_start_makes_no_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome: PollOutcome<()> = poll_until(fast(4), &cancel, |_| async { None }).await;
        assert_eq!(outcome, PollOutcome::Cancelled { attempts: 0 });
    }

    #[tokio::test]
    async fn cancellation_interrupts_wait() {
        let cancel = CancellationToken::new();
        let policy = PollPolicy {
            interval: Duration::from_secs(60),
            max_attempts: 5,
        };

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcome: PollOutcome<()> = tokio::time::timeout(
            Duration::from_secs(5),
            poll_until(policy, &cancel, |_| async { None }),
        )
        .await
        .expect("poll should stop on cancellation");
        assert_eq!(outcome, PollOutcome::Cancelled { attempts: 1 });
        assert_eq!(outcome.attempts(), 1);
    }
}
