//! Polling a remote resource until it settles.
//!
//! A [`Waiter`] fetches a snapshot, asks a classifier whether it is done,
//! and sleeps between polls. It never spawns tasks; cancellation is observed
//! both while fetching and while sleeping.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ProviderError;

/// Polling interval when none is configured.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Classification of one observed snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll {
    /// Terminal success.
    Ready,
    /// Terminal failure with a reason.
    Failed(String),
    /// Still converging.
    Pending,
}

/// What a 404 during polling means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotFound {
    /// The resource must exist.
    #[default]
    IsError,
    /// The resource is being deleted and 404 means done.
    IsSuccess,
}

/// Growth of the polling interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same interval every time.
    Constant,
    /// Multiply the interval after each poll, up to `max`.
    Exponential {
        /// Growth factor.
        multiplier: f64,
        /// Upper bound.
        max: Duration,
    },
}

impl Backoff {
    /// Interval after `interval`. A multiplier that is not a finite
    /// positive number, or a product that overflows, jumps to `max`.
    fn next(&self, interval: Duration) -> Duration {
        match *self {
            Backoff::Constant => interval,
            Backoff::Exponential { multiplier, max } => {
                if !(multiplier.is_finite() && multiplier > 0.0) {
                    return max;
                }
                Duration::try_from_secs_f64(interval.as_secs_f64() * multiplier)
                    .map_or(max, |next| next.min(max))
            },
        }
    }
}

/// What the waiter observed when it returned successfully.
#[derive(Debug, Clone, PartialEq)]
pub enum Settled<T> {
    /// The last snapshot, classified ready.
    Ready(T),
    /// The resource disappeared and [`NotFound::IsSuccess`] was requested.
    Gone,
}

impl<T> Settled<T> {
    /// The snapshot, if the resource still exists.
    pub fn into_inner(self) -> Option<T> {
        match self {
            Self::Ready(v) => Some(v),
            Self::Gone => None,
        }
    }
}

/// Polls a resource until it reaches a terminal state.
#[derive(Debug, Clone)]
pub struct Waiter {
    resource: String,
    interval: Duration,
    timeout: Duration,
    backoff: Backoff,
    not_found: NotFound,
    cancel: CancellationToken,
}

impl Waiter {
    /// Wait for `resource` (its identifier, used in errors and logs).
    pub fn new(resource: impl Into<String>, timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            resource: resource.into(),
            interval: DEFAULT_INTERVAL,
            timeout,
            backoff: Backoff::Constant,
            not_found: NotFound::IsError,
            cancel,
        }
    }

    /// Set the polling interval.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the backoff policy.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the not-found policy.
    pub fn not_found(mut self, policy: NotFound) -> Self {
        self.not_found = policy;
        self
    }

    async fn cancellable<F: Future>(&self, fut: F) -> Result<F::Output, ProviderError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ProviderError::Cancelled),
            out = fut => Ok(out),
        }
    }

    /// Poll until `classify` reports a terminal state.
    ///
    /// `state_of` names a snapshot's state for logs and timeout errors. When
    /// the next sleep would pass the timeout the waiter gives up with
    /// [`ProviderError::WaiterTimeout`] instead of sleeping; a zero timeout
    /// therefore fetches exactly once.
    pub async fn wait<T, F, Fut, C, S>(
        &self,
        mut fetch: F,
        classify: C,
        state_of: S,
    ) -> Result<Settled<T>, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
        C: Fn(&T) -> Poll,
        S: Fn(&T) -> String,
    {
        let start = Instant::now();
        let mut interval = self.interval;
        let mut last_state: String;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let snapshot = match self.cancellable(fetch()).await? {
                Ok(snapshot) => snapshot,
                Err(e) if e.is_not_found() && self.not_found == NotFound::IsSuccess => {
                    debug!(resource = %self.resource, attempt, "resource gone");
                    return Ok(Settled::Gone);
                },
                Err(e) => return Err(e),
            };

            last_state = state_of(&snapshot);
            match classify(&snapshot) {
                Poll::Ready => {
                    debug!(resource = %self.resource, attempt, state = %last_state, "resource ready");
                    return Ok(Settled::Ready(snapshot));
                },
                Poll::Failed(reason) => {
                    return Err(ProviderError::TerminalFailure {
                        resource: self.resource.clone(),
                        state: last_state,
                        reason,
                    });
                },
                Poll::Pending => {
                    debug!(resource = %self.resource, attempt, state = %last_state, "resource pending");
                },
            }

            let elapsed = start.elapsed();
            if elapsed + interval > self.timeout {
                break;
            }
            self.cancellable(tokio::time::sleep(interval)).await?;

            interval = self.backoff.next(interval);
        }

        Err(ProviderError::WaiterTimeout {
            resource: self.resource.clone(),
            elapsed: start.elapsed(),
            last_state,
        })
    }
}

/// Run `mutation`; if the API rejects it because the resource is in a
/// transient state, run `settle` and try the mutation once more.
pub async fn retry_on_transient_state_error<T, M, MFut, W, WFut>(
    mut mutation: M,
    settle: W,
) -> Result<T, ProviderError>
where
    M: FnMut() -> MFut,
    MFut: Future<Output = Result<T, ProviderError>>,
    W: FnOnce() -> WFut,
    WFut: Future<Output = Result<(), ProviderError>>,
{
    match mutation().await {
        Err(e) if e.is_transient() => {
            warn!(error = %e, "resource in transient state, waiting before retry");
            settle().await?;
            mutation().await
        },
        result => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ApiError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn counted_fetch(
        counter: Arc<AtomicU32>,
    ) -> impl FnMut() -> std::future::Ready<Result<u32, ProviderError>> {
        move || std::future::ready(Ok(counter.fetch_add(1, Ordering::SeqCst) + 1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_pending() {
        let fetches = Arc::new(AtomicU32::new(0));
        let waiter = Waiter::new("fr-par-1/vol", Duration::from_secs(1), CancellationToken::new())
            .interval(Duration::from_millis(10));

        let start = Instant::now();
        let out = waiter
            .wait(
                counted_fetch(fetches.clone()),
                |n| if *n >= 4 { Poll::Ready } else { Poll::Pending },
                |n| format!("poll-{n}"),
            )
            .await
            .unwrap();

        assert_eq!(out, Settled::Ready(4));
        assert_eq!(fetches.load(Ordering::SeqCst), 4);
        assert_eq!(start.elapsed(), Duration::from_millis(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_last_state() {
        let fetches = Arc::new(AtomicU32::new(0));
        let waiter = Waiter::new("fr-par-1/vol", Duration::from_millis(250), CancellationToken::new())
            .interval(Duration::from_millis(100));

        let err = waiter
            .wait(counted_fetch(fetches.clone()), |_| Poll::Pending, |_| "creating".to_string())
            .await
            .unwrap_err();

        let polls = fetches.load(Ordering::SeqCst);
        assert!((2..=3).contains(&polls));
        match err {
            ProviderError::WaiterTimeout { last_state, resource, .. } => {
                assert_eq!(last_state, "creating");
                assert_eq!(resource, "fr-par-1/vol");
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_single_fetch() {
        let fetches = Arc::new(AtomicU32::new(0));
        let waiter = Waiter::new("vol", Duration::ZERO, CancellationToken::new());
        let start = Instant::now();
        let err = waiter
            .wait(counted_fetch(fetches.clone()), |_| Poll::Pending, |_| "creating".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::WaiterTimeout { .. }));
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_failure() {
        let waiter = Waiter::new("vol", Duration::from_secs(5), CancellationToken::new());
        let err = waiter
            .wait(
                || async { Ok::<_, ProviderError>("error") },
                |s| if *s == "error" { Poll::Failed("volume in error".into()) } else { Poll::Pending },
                |s| s.to_string(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::TerminalFailure { ref state, .. } if state == "error"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_policies() {
        let gone = || async { Err::<(), _>(ProviderError::from(ApiError::http(404, "gone", "volume"))) };

        let waiter = Waiter::new("vol", Duration::from_secs(5), CancellationToken::new())
            .not_found(NotFound::IsSuccess);
        let out = waiter.wait(gone, |_| Poll::Pending, |_| String::new()).await.unwrap();
        assert_eq!(out.into_inner(), None);

        let waiter = Waiter::new("vol", Duration::from_secs(5), CancellationToken::new());
        let err = waiter.wait(gone, |_| Poll::Pending, |_| String::new()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_sleep() {
        let cancel = CancellationToken::new();
        let waiter = Waiter::new("vol", Duration::from_secs(600), cancel.clone())
            .interval(Duration::from_secs(5));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let err = waiter
            .wait(|| async { Ok::<_, ProviderError>(()) }, |_| Poll::Pending, |_| "busy".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_fetch() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let waiter = Waiter::new("vol", Duration::from_secs(600), cancel);
        let err = waiter
            .wait(
                || std::future::pending::<Result<(), ProviderError>>(),
                |_| Poll::Ready,
                |_| String::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_backoff() {
        let fetches = Arc::new(AtomicU32::new(0));
        let waiter = Waiter::new("vol", Duration::from_secs(60), CancellationToken::new())
            .interval(Duration::from_secs(1))
            .backoff(Backoff::Exponential {
                multiplier: 2.0,
                max: Duration::from_secs(3),
            });
        let start = Instant::now();
        waiter
            .wait(counted_fetch(fetches), |n| if *n >= 4 { Poll::Ready } else { Poll::Pending }, |_| String::new())
            .await
            .unwrap();
        // Sleeps of 1s, 2s and 3s (capped).
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unusable_multiplier_falls_back_to_max() {
        for multiplier in [-1.0, 0.0, f64::NAN, f64::INFINITY, 1e300] {
            let fetches = Arc::new(AtomicU32::new(0));
            let waiter = Waiter::new("vol", Duration::from_secs(60), CancellationToken::new())
                .interval(Duration::from_secs(1))
                .backoff(Backoff::Exponential {
                    multiplier,
                    max: Duration::from_secs(5),
                });
            let start = Instant::now();
            waiter
                .wait(counted_fetch(fetches), |n| if *n >= 3 { Poll::Ready } else { Poll::Pending }, |_| String::new())
                .await
                .unwrap();
            // Sleeps of 1s then 5s.
            assert_eq!(start.elapsed(), Duration::from_secs(6), "multiplier {multiplier}");
        }
    }

    #[tokio::test]
    async fn test_retry_on_transient_state_error() {
        let attempts = AtomicU32::new(0);
        let settled = AtomicU32::new(0);
        let out = retry_on_transient_state_error(
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ProviderError::from(ApiError::http(409, "resource is in a transient state", "key")))
                    } else {
                        Ok("rotated")
                    }
                }
            },
            || {
                settled.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            },
        )
        .await
        .unwrap();
        assert_eq!(out, "rotated");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(settled.load(Ordering::SeqCst), 1);
    }

    proptest::proptest! {
        #[test]
        fn prop_bounded_success(ready_after in 1u32..20, interval_ms in 1u64..50) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();
            let fetches = Arc::new(AtomicU32::new(0));
            let interval = Duration::from_millis(interval_ms);
            let waiter = Waiter::new("vol", interval * ready_after, CancellationToken::new()).interval(interval);

            let (out, elapsed) = rt.block_on(async {
                let start = Instant::now();
                let out = waiter
                    .wait(
                        counted_fetch(fetches.clone()),
                        move |n| if *n >= ready_after { Poll::Ready } else { Poll::Pending },
                        |n| n.to_string(),
                    )
                    .await;
                (out, start.elapsed())
            });

            proptest::prop_assert_eq!(out.unwrap(), Settled::Ready(ready_after));
            proptest::prop_assert_eq!(fetches.load(Ordering::SeqCst), ready_after);
            proptest::prop_assert_eq!(elapsed, interval * (ready_after - 1));
        }
    }

    #[test]
    fn test_plain_conflict_is_not_retried() {
        let attempts = AtomicU32::new(0);
        let err = tokio_test::assert_err!(tokio_test::block_on(retry_on_transient_state_error(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ProviderError::from(ApiError::http(409, "duplicate", "key"))) }
            },
            || async { Ok(()) },
        )));
        assert!(!err.is_transient());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        let out = tokio_test::assert_ok!(tokio_test::block_on(retry_on_transient_state_error(
            || async { Ok::<_, ProviderError>(7) },
            || async { Ok(()) },
        )));
        assert_eq!(out, 7);
    }
}
