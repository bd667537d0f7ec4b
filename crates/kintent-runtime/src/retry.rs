//! Bounded retry with exponential backoff and jitter.
//!
//! Only [`ClassifiedError::Retryable`] failures are retried. Backoff sleeps
//! observe a [`StopSignal`], so a cancelled or timed-out execution never
//! waits out its full backoff schedule.

use kintent_core::{ClassifiedError, ReconcileConfig};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, warn};

/// Retry settings for a single cluster write.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Scale each delay by a random factor in `0.5..1.5`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ReconcileConfig::default())
    }
}

impl From<&ReconcileConfig> for RetryPolicy {
    fn from(config: &ReconcileConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            multiplier: config.backoff_multiplier,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy without retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-based), before jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry.min(i32::MAX as u32) as i32);
        let secs = (self.initial_backoff.as_secs_f64() * factor).min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Delay before retry number `retry`, with jitter when enabled.
    pub fn delay(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        if !self.jitter {
            return base;
        }
        let jitter = rand::rng().random_range(0.5..1.5);
        Duration::from_secs_f64(base.as_secs_f64() * jitter).min(self.max_backoff)
    }
}

/// Why forward progress stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    DeadlineExceeded,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Cancelled => write!(f, "cancelled"),
            StopReason::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

/// Deadline and cancel signal for one execution.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

impl StopSignal {
    pub fn new(deadline: Option<Instant>, cancel: Option<watch::Receiver<bool>>) -> Self {
        Self { deadline, cancel }
    }

    /// A signal that never fires; used for rollback, which always completes.
    pub fn never() -> Self {
        Self::default()
    }

    /// Whether the execution should stop now.
    pub fn check(&self) -> Option<StopReason> {
        if self.cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Some(StopReason::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(StopReason::DeadlineExceeded);
        }
        None
    }

    /// Sleep for `duration` unless the signal fires first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), StopReason> {
        if let Some(reason) = self.check() {
            return Err(reason);
        }
        let wake = tokio::time::sleep(duration);
        tokio::pin!(wake);
        let mut cancel = self.cancel.clone();

        loop {
            let expired = async {
                match self.deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };
            let cancelled = async {
                match cancel.as_mut() {
                    Some(rx) => {
                        if rx.changed().await.is_err() {
                            // Sender gone: the signal can no longer fire.
                            std::future::pending::<()>().await;
                        }
                    }
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = &mut wake => return Ok(()),
                _ = expired => return Err(StopReason::DeadlineExceeded),
                _ = cancelled => {
                    if let Some(reason) = self.check() {
                        return Err(reason);
                    }
                }
            }
        }
    }
}

/// Result of a retried operation.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, ClassifiedError>,
    /// Calls made, including the first.
    pub attempts: u32,
    /// Set when a backoff sleep was cut short; `result` then holds the last
    /// retryable error.
    pub stopped: Option<StopReason>,
}

/// Run `operation`, retrying retryable errors per `policy`.
pub async fn retry_classified<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    stop: &StopSignal,
    mut operation: F,
) -> Attempted<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClassifiedError>>,
{
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let err = match operation().await {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts,
                    stopped: None,
                };
            }
            Err(err) => err,
        };

        if !err.is_retryable() {
            return Attempted {
                result: Err(err),
                attempts,
                stopped: None,
            };
        }

        let retry = attempts - 1;
        if retry >= policy.max_retries {
            error!(
                operation = %operation_name,
                attempts = attempts,
                error = %err,
                "Operation failed after max retries"
            );
            return Attempted {
                result: Err(err),
                attempts,
                stopped: None,
            };
        }

        let delay = policy.delay(retry);
        warn!(
            operation = %operation_name,
            attempt = attempts,
            error = %err,
            delay_ms = delay.as_millis() as u64,
            "Operation failed, retrying"
        );

        if let Err(reason) = stop.sleep(delay).await {
            warn!(operation = %operation_name, reason = %reason, "Retry interrupted");
            return Attempted {
                result: Err(err),
                attempts,
                stopped: Some(reason),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.base_delay(0), Duration::from_millis(200));
        assert_eq!(policy.base_delay(1), Duration::from_millis(400));
        assert_eq!(policy.base_delay(2), Duration::from_millis(800));
        assert_eq!(policy.base_delay(10), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_within_cap() {
        let policy = RetryPolicy::default();
        for retry in 0..8 {
            let delay = policy.delay(retry);
            assert!(delay <= policy.max_backoff);
            assert!(delay >= policy.base_delay(retry).mul_f64(0.5) - Duration::from_millis(1));
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_retryable_failures() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let out = retry_classified(&fast(3), "op", &StopSignal::never(), move || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ClassifiedError::Retryable("throttled".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(out.result, Ok(7));
        assert_eq!(out.attempts, 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let out: Attempted<()> = retry_classified(&fast(3), "op", &StopSignal::never(), || async {
            Err(ClassifiedError::Retryable("timeout".into()))
        })
        .await;
        assert!(out.result.is_err());
        assert_eq!(out.attempts, 4);
    }

    #[tokio::test]
    async fn test_fatal_and_conflict_are_not_retried() {
        for err in [
            ClassifiedError::Fatal("forbidden".into()),
            ClassifiedError::Conflict("stale".into()),
        ] {
            let out: Attempted<()> =
                retry_classified(&fast(3), "op", &StopSignal::never(), || {
                    let err = err.clone();
                    async move { Err(err) }
                })
                .await;
            assert_eq!(out.attempts, 1);
            assert_eq!(out.result, Err(err));
        }
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let (tx, rx) = watch::channel(false);
        let stop = StopSignal::new(None, Some(rx));
        let policy = RetryPolicy {
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(30),
            ..fast(3)
        };

        let handle = tokio::spawn(async move {
            retry_classified::<_, _, ()>(&policy, "op", &stop, || async {
                Err(ClassifiedError::Retryable("unavailable".into()))
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        let out = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("backoff must be interrupted")
            .unwrap();
        assert_eq!(out.attempts, 1);
        assert_eq!(out.stopped, Some(StopReason::Cancelled));
    }

    #[tokio::test]
    async fn test_deadline_interrupts_backoff() {
        let stop = StopSignal::new(Some(Instant::now() + Duration::from_millis(20)), None);
        let policy = RetryPolicy {
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(30),
            ..fast(3)
        };
        let out: Attempted<()> = retry_classified(&policy, "op", &stop, || async {
            Err(ClassifiedError::Retryable("unavailable".into()))
        })
        .await;
        assert_eq!(out.stopped, Some(StopReason::DeadlineExceeded));
    }

    #[test]
    fn test_dropped_sender_does_not_cancel() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        assert_eq!(StopSignal::new(None, Some(rx)).check(), None);
    }
}
