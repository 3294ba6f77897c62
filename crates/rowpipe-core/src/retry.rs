//! Exponential-backoff retry around transient failures.

use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{PipelineError, Result};

/// Substrings whose case-insensitive presence in an error message marks it
/// as transient. Backend adapters should override the classifier with
/// structured codes where available.
const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "deadlock",
    "connection",
    "network",
    "broken pipe",
    "transport",
    "io error",
    "locked",
    "busy",
    "lock",
    "stream",
    "not open",
    "socket",
];

/// The default transient classifier: the `Transient` kind, or a message
/// matching one of the known markers.
pub fn default_transient(error: &PipelineError) -> bool {
    if matches!(error, PipelineError::Transient { .. }) {
        return true;
    }
    if matches!(error, PipelineError::Cancelled) {
        return false;
    }
    let message = error.to_string().to_ascii_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| message.contains(m))
}

type Classifier = Box<dyn Fn(&PipelineError) -> bool + Send + Sync>;

/// Wraps a unit of work (typically `write_batch`) in exponential backoff.
pub struct RetryPolicy {
    max_retries: u32,
    initial_delay: Duration,
    classifier: Classifier,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            classifier: Box::new(default_transient),
        }
    }

    pub fn with_classifier(
        mut self,
        classifier: impl Fn(&PipelineError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.classifier = Box::new(classifier);
        self
    }

    /// Run `op` against `ctx`, retrying transient failures with delays of
    /// `initial_delay * 2^attempt`. Non-transient failures surface
    /// immediately; exhausted retries surface as permanent I/O errors;
    /// cancellation during a backoff sleep aborts the retry.
    ///
    /// `ctx` is the mutable state the operation needs across attempts (a
    /// writer, a connection); it is re-borrowed for every attempt.
    pub async fn run<C: ?Sized, T>(
        &self,
        cancel: &CancellationToken,
        ctx: &mut C,
        mut op: impl for<'a> FnMut(&'a mut C) -> BoxFuture<'a, Result<T>>,
    ) -> Result<T> {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            match op(&mut *ctx).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) if (self.classifier)(&e) => {
                    if attempt >= self.max_retries {
                        return Err(PipelineError::io_from(
                            format!("retries exhausted after {} attempts: {e}", attempt + 1),
                            e,
                        ));
                    }
                    let delay = self.initial_delay.saturating_mul(2u32.saturating_pow(attempt));
                    warn!(attempt, ?delay, error = %e, "transient failure, backing off");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::time::Instant;

    #[test]
    fn classifier_matches_known_markers() {
        assert!(default_transient(&PipelineError::io("Connection reset by peer")));
        assert!(default_transient(&PipelineError::io("database is LOCKED")));
        assert!(default_transient(&PipelineError::transient("anything")));
        assert!(!default_transient(&PipelineError::io("syntax error near SELECT")));
        assert!(!default_transient(&PipelineError::Cancelled));
    }

    #[tokio::test]
    async fn two_transient_failures_then_success() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let cancel = CancellationToken::new();
        let started = Instant::now();
        let mut calls = 0u32;
        let result = policy
            .run(&cancel, &mut calls, |calls| {
                async move {
                    *calls += 1;
                    if *calls <= 2 {
                        Err(PipelineError::io("transient timeout"))
                    } else {
                        Ok(7)
                    }
                }
                .boxed()
            })
            .await
            .unwrap();
        assert_eq!(result, 7);
        assert_eq!(calls, 3);
        // 10ms + 20ms of backoff.
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn non_transient_failures_surface_immediately() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let cancel = CancellationToken::new();
        let mut calls = 0u32;
        let err = policy
            .run(&cancel, &mut calls, |calls| {
                async move {
                    *calls += 1;
                    Err::<(), _>(PipelineError::schema("bad column"))
                }
                .boxed()
            })
            .await
            .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, PipelineError::Schema { .. }));
    }

    #[tokio::test]
    async fn exhausted_retries_surface_as_permanent() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let cancel = CancellationToken::new();
        let mut calls = 0u32;
        let err = policy
            .run(&cancel, &mut calls, |calls| {
                async move {
                    *calls += 1;
                    Err::<(), _>(PipelineError::transient("still down"))
                }
                .boxed()
            })
            .await
            .unwrap_err();
        assert_eq!(calls, 3);
        assert!(matches!(err, PipelineError::Io { .. }));
        assert!(err.to_string().contains("retries exhausted"));
    }

    #[tokio::test]
    async fn cancellation_during_backoff_aborts() {
        let policy = RetryPolicy::new(5, Duration::from_millis(500));
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let started = Instant::now();
        let err = policy
            .run(&cancel, &mut (), |_| {
                async { Err::<(), _>(PipelineError::transient("down")) }.boxed()
            })
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn pre_cancelled_token_skips_the_work() {
        let policy = RetryPolicy::new(1, Duration::from_millis(1));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut calls = 0u32;
        let err = policy
            .run(&cancel, &mut calls, |calls| {
                async move {
                    *calls += 1;
                    Ok::<_, PipelineError>(1)
                }
                .boxed()
            })
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(calls, 0);
    }
}
