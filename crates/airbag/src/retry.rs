// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use sundial::Clock;

use crate::rnd::Rnd;
use crate::{Cancellation, Classification, RetryError, RetryPolicy};

type OnRetry = Arc<dyn Fn(&RetryNotice<'_>) + Send + Sync>;

/// Describes a retry that is about to happen.
///
/// Passed to the hook registered with [`RetryExecutor::on_retry`] right before the executor
/// suspends for `delay`.
#[derive(Debug)]
#[non_exhaustive]
pub struct RetryNotice<'a> {
    /// 0-indexed number of the attempt that just failed.
    pub attempt: u32,

    /// How long the executor waits before the next attempt.
    pub delay: Duration,

    /// The failure that triggered the retry.
    pub error: &'a dyn Debug,
}

/// Runs a fallible operation until it succeeds, fails terminally or runs out of attempts.
///
/// Delays between attempts are computed from the [`RetryPolicy`] and awaited on the injected
/// [`Clock`], so other tasks keep running while a retry is pending and tests can drive the
/// schedule with a controlled clock.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use airbag::{Classify, NetworkErrorKind, RetryExecutor, RetryPolicy};
/// use sundial::Clock;
///
/// # async fn example(clock: Clock) {
/// let executor = RetryExecutor::new(
///     clock,
///     RetryPolicy::Fixed {
///         delay: Duration::from_millis(50),
///         max_attempts: 3,
///     },
/// );
///
/// let result: Result<u32, NetworkErrorKind> = executor
///     .execute(|| async { Err(NetworkErrorKind::Timeout) }, NetworkErrorKind::classify)
///     .await;
///
/// assert_eq!(result, Err(NetworkErrorKind::Timeout));
/// # }
/// ```
#[derive(Clone)]
pub struct RetryExecutor {
    clock: Clock,
    policy: RetryPolicy,
    on_retry: Option<OnRetry>,
    rnd: Rnd,
}

impl Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .field("on_retry", &self.on_retry.is_some())
            .finish_non_exhaustive()
    }
}

impl RetryExecutor {
    /// Creates an executor that follows `policy`.
    #[must_use]
    pub fn new(clock: Clock, policy: RetryPolicy) -> Self {
        Self {
            clock,
            policy,
            on_retry: None,
            rnd: Rnd::default(),
        }
    }

    /// Registers a hook invoked before every suspension between attempts.
    #[must_use]
    pub fn on_retry(mut self, hook: impl Fn(&RetryNotice<'_>) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    /// Returns the policy.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `operation` with retries.
    ///
    /// `classify` decides whether a failure is worth another attempt. A terminal failure is
    /// returned immediately; once attempts are exhausted the last observed error is returned.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt.
    pub async fn execute<T, E, Op, Fut, C>(&self, mut operation: Op, classify: C) -> Result<T, E>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> Classification,
        E: Debug,
    {
        let mut attempt = 0;

        loop {
            let result = operation().await;

            match self.evaluate_attempt(attempt, result, &classify) {
                ControlFlow::Break(result) => return result,
                ControlFlow::Continue(delay) => self.clock.delay(delay).await,
            }

            attempt = attempt.saturating_add(1);
        }
    }

    /// Runs `operation` with retries until it completes or `cancellation` fires.
    ///
    /// Cancellation never interrupts an attempt that is already running; the attempt is
    /// allowed to finish and its result is discarded. No further attempt is started after
    /// cancellation has been observed, and a pending backoff delay ends early.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::Cancelled`] if the token fired, otherwise
    /// [`RetryError::Operation`] with the error of the last attempt.
    pub async fn execute_with_cancellation<T, E, Op, Fut, C>(
        &self,
        cancellation: &Cancellation,
        mut operation: Op,
        classify: C,
    ) -> Result<T, RetryError<E>>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> Classification,
        E: Debug,
    {
        let mut attempt = 0;

        loop {
            if cancellation.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            let result = operation().await;

            if cancellation.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            let delay = match self.evaluate_attempt(attempt, result, &classify) {
                ControlFlow::Break(result) => return result.map_err(RetryError::Operation),
                ControlFlow::Continue(delay) => delay,
            };

            tokio::select! {
                () = cancellation.cancelled() => return Err(RetryError::Cancelled),
                () = self.clock.delay(delay) => {}
            }

            attempt = attempt.saturating_add(1);
        }
    }

    fn evaluate_attempt<T, E, C>(&self, attempt: u32, result: Result<T, E>, classify: &C) -> ControlFlow<Result<T, E>, Duration>
    where
        C: Fn(&E) -> Classification,
        E: Debug,
    {
        let error = match result {
            Ok(value) => return ControlFlow::Break(Ok(value)),
            Err(error) => error,
        };

        let is_last = attempt.saturating_add(1) >= self.policy.max_attempts();
        if is_last || classify(&error) == Classification::Terminal {
            return ControlFlow::Break(Err(error));
        }

        let delay = self.policy.delay_with(attempt, &self.rnd);

        tracing::event!(
            name: "airbag.retry",
            tracing::Level::WARN,
            resilience.attempt.index = attempt,
            resilience.attempt.is_last = false,
            resilience.retry.delay = delay.as_secs_f32(),
            error = ?error,
            "operation failed, retrying",
        );

        if let Some(hook) = &self.on_retry {
            hook(&RetryNotice {
                attempt,
                delay,
                error: &error,
            });
        }

        ControlFlow::Continue(delay)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use parking_lot::Mutex;
    use sundial::ClockControl;

    use super::*;
    use crate::{Classify, NetworkErrorKind};

    static_assertions::assert_impl_all!(RetryExecutor: Send, Sync, Clone, Debug);

    fn exponential(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::Exponential {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_attempts,
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let control = ClockControl::new().auto_advance_timers(true);
        let executor = RetryExecutor::new(control.to_clock(), exponential(5));
        let calls = AtomicU32::new(0);

        let result = executor
            .execute(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move { if n < 2 { Err(NetworkErrorKind::ConnectionLost) } else { Ok("done") } }
                },
                NetworkErrorKind::classify,
            )
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s + 2s of backoff
        assert_eq!(control.to_clock().now().as_millis(), 3_000);
    }

    #[tokio::test]
    async fn returns_last_error_when_exhausted() {
        let control = ClockControl::new().auto_advance_timers(true);
        let executor = RetryExecutor::new(control.to_clock(), exponential(3));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = executor
            .execute(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move { Err(NetworkErrorKind::ServerError(500 + u16::try_from(n).unwrap_or(0))) }
                },
                NetworkErrorKind::classify,
            )
            .await;

        assert_eq!(result, Err(NetworkErrorKind::ServerError(502)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn uncancelled_token_follows_the_same_schedule() {
        let flaky = |calls: &AtomicU32| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n < 3 { Err(NetworkErrorKind::Timeout) } else { Ok(n) } }
        };

        let plain = ClockControl::new().auto_advance_timers(true);
        let calls = AtomicU32::new(0);
        let result = RetryExecutor::new(plain.to_clock(), exponential(5))
            .execute(|| flaky(&calls), NetworkErrorKind::classify)
            .await;

        let tokened = ClockControl::new().auto_advance_timers(true);
        let token_calls = AtomicU32::new(0);
        let token_result = RetryExecutor::new(tokened.to_clock(), exponential(5))
            .execute_with_cancellation(&Cancellation::new(), || flaky(&token_calls), NetworkErrorKind::classify)
            .await;

        assert_eq!(result, Ok(3));
        assert!(matches!(token_result, Ok(3)));
        // 1s + 2s + 4s of backoff
        assert_eq!(plain.to_clock().now().as_millis(), 7_000);
        assert_eq!(tokened.to_clock().now().as_millis(), 7_000);
    }

    #[tokio::test]
    async fn terminal_errors_are_not_retried() {
        let executor = RetryExecutor::new(Clock::new_frozen(), exponential(5));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = executor
            .execute(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(NetworkErrorKind::Unauthorized) }
                },
                NetworkErrorKind::classify,
            )
            .await;

        assert_eq!(result, Err(NetworkErrorKind::Unauthorized));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hook_sees_every_retry() {
        let control = ClockControl::new().auto_advance_timers(true);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let executor = RetryExecutor::new(control.to_clock(), exponential(4)).on_retry(move |notice| {
            seen_clone.lock().push((notice.attempt, notice.delay, format!("{:?}", notice.error)));
        });

        let _: Result<(), _> = executor
            .execute(|| async { Err(NetworkErrorKind::Timeout) }, NetworkErrorKind::classify)
            .await;

        assert_eq!(
            *seen.lock(),
            vec![
                (0, Duration::from_secs(1), "Timeout".to_string()),
                (1, Duration::from_secs(2), "Timeout".to_string()),
                (2, Duration::from_secs(4), "Timeout".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_attempt() {
        let executor = RetryExecutor::new(Clock::new_frozen(), exponential(5));
        let token = Cancellation::new();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = executor
            .execute_with_cancellation(
                &token,
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    token.cancel();
                    async { Err(NetworkErrorKind::Timeout) }
                },
                NetworkErrorKind::classify,
            )
            .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_discards_successful_result() {
        let executor = RetryExecutor::new(Clock::new_frozen(), RetryPolicy::None);
        let token = Cancellation::new();

        let result = executor
            .execute_with_cancellation(
                &token,
                || {
                    token.cancel();
                    async { Ok::<_, NetworkErrorKind>(7) }
                },
                NetworkErrorKind::classify,
            )
            .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let control = ClockControl::new();
        let executor = RetryExecutor::new(control.to_clock(), exponential(5));
        let token = Cancellation::new();
        let calls = Arc::new(AtomicU32::new(0));

        let task = {
            let token = token.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                executor
                    .execute_with_cancellation(
                        &token,
                        || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            async { Err::<(), _>(NetworkErrorKind::Timeout) }
                        },
                        NetworkErrorKind::classify,
                    )
                    .await
            })
        };

        while control.pending_timers() == 0 {
            tokio::task::yield_now().await;
        }
        token.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn already_cancelled_never_runs() {
        let executor = RetryExecutor::new(Clock::new_frozen(), RetryPolicy::None);
        let token = Cancellation::new();
        token.cancel();

        let result = executor
            .execute_with_cancellation(&token, || async { Ok::<_, NetworkErrorKind>(1) }, NetworkErrorKind::classify)
            .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
    }

    #[test]
    fn debug_omits_hook_body() {
        let executor = RetryExecutor::new(Clock::new_frozen(), RetryPolicy::None).on_retry(|_| {});
        let debug = format!("{executor:?}");
        assert!(debug.contains("on_retry: true"), "{debug}");
    }
}
