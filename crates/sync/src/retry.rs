//! Bounded retry with capped exponential backoff.

use std::future::Future;
use std::time::Duration;

use emdash_protocol::ContextId;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{FailureKind, SyncError};
use crate::session::Session;

/// Retry settings shared by every remote call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts for transient failures; `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Backoff cap.
    pub max_delay: Duration,
    /// Multiplier for each subsequent attempt.
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(5),
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(15),
            backoff_factor: 2.0,
        }
    }
}

/// Spreads `secs` over ±25% as `unit` goes from 0 to 1.
fn jittered(secs: f64, unit: f64) -> f64 {
    let offset = unit * 2.0 - 1.0;
    (secs + secs * 0.25 * offset).max(0.0)
}

impl RetryPolicy {
    /// Never gives up. Only meant for daemon start-up, where waiting for
    /// the database to come back is the whole point.
    pub fn forever() -> Self {
        Self {
            max_attempts: None,
            max_delay: Duration::from_secs(10),
            ..Self::default()
        }
    }

    /// Calculates the delay after a failed attempt (1-based),
    /// with ±25% jitter to avoid thundering herd.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        let unit = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as f64
            / 1_000_000_000.0; // [0.0, 1.0)
        Duration::from_secs_f64(jittered(capped, unit))
    }

    /// Whether attempt number `attempt` (1-based) may run.
    pub fn allows_attempt(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt <= max)
    }

    /// Runs `op` with the current session context until it succeeds or
    /// fails for good.
    ///
    /// Transient failures back off and retry up to `max_attempts`. An
    /// expired context triggers one re-login and one more try. Everything
    /// else is returned as is.
    pub async fn run<T, F, Fut>(
        &self,
        session: &Session,
        cancel: &CancellationToken,
        label: &str,
        mut op: F,
    ) -> Result<T, SyncError>
    where
        F: FnMut(ContextId) -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let mut attempt = 0u32;
        let mut relogged = false;

        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::cancelled());
            }
            attempt = attempt.saturating_add(1);
            let ctx = session.current_context().await?;

            let err = match op(ctx.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            match err.kind() {
                Some(FailureKind::TransientNetwork) if self.allows_attempt(attempt + 1) => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        op = label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    sleep_or_cancel(delay, cancel).await?;
                }
                Some(FailureKind::AuthExpired) if !relogged => {
                    relogged = true;
                    info!(op = label, "session expired, logging in again");
                    session.relogin(&ctx).await?;
                }
                _ => {
                    debug!(op = label, attempt, error = %err, "giving up");
                    return Err(err);
                }
            }
        }
    }
}

/// Sleeps for `delay` unless `cancel` fires first.
pub(crate) async fn sleep_or_cancel(
    delay: Duration,
    cancel: &CancellationToken,
) -> Result<(), SyncError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(SyncError::cancelled()),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRemote;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: Some(max),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_factor: 2.0,
        }
    }

    async fn logged_in(mock: &Arc<MockRemote>) -> Session {
        let session = mock.session();
        session.login().await.unwrap();
        session
    }

    #[test]
    fn default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, Some(5));
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_secs(15));
        assert!((policy.backoff_factor - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn delay_backoff_with_jitter() {
        let policy = RetryPolicy::default();
        // Base delays: 250ms, 500ms, 1s, 2s, 4s, 8s, 15s (capped), 15s...
        let expected_base = [0.25, 0.5, 1.0, 2.0, 4.0, 8.0, 15.0, 15.0];
        for (i, &base) in expected_base.iter().enumerate() {
            let delay = policy.delay_for_attempt((i + 1) as u32);
            let secs = delay.as_secs_f64();
            let lo = base * 0.74;
            let hi = base * 1.26;
            assert!(
                secs >= lo && secs <= hi,
                "attempt {}: {secs:.3}s not in [{lo:.3}, {hi:.3}]",
                i + 1
            );
        }
    }

    #[test]
    fn jitter_spans_both_sides() {
        assert!((jittered(4.0, 0.0) - 3.0).abs() < 1e-9);
        assert!((jittered(4.0, 0.5) - 4.0).abs() < 1e-9);
        assert!(jittered(4.0, 0.999_999_999) > 4.99);
        // The largest value a sub-second nanosecond count can produce.
        assert!(jittered(4.0, 999_999_999.0 / 1_000_000_000.0) > 4.0);
    }

    #[test]
    fn forever_allows_any_attempt() {
        let policy = RetryPolicy::forever();
        assert!(policy.allows_attempt(u32::MAX));
        assert!(!RetryPolicy::default().allows_attempt(6));
        assert!(RetryPolicy::default().allows_attempt(5));
    }

    #[tokio::test]
    async fn transient_retried_until_success() {
        let mock = Arc::new(MockRemote::new());
        let session = logged_in(&mock).await;
        let calls = AtomicU32::new(0);

        let result = fast_policy(5)
            .run(&session, &CancellationToken::new(), "test", |_ctx| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(SyncError::transient("reset"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn transient_gives_up_at_cap() {
        let mock = Arc::new(MockRemote::new());
        let session = logged_in(&mock).await;
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = fast_policy(3)
            .run(&session, &CancellationToken::new(), "test", |_ctx| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SyncError::transient("timeout")) }
            })
            .await;

        assert_eq!(
            result.unwrap_err().kind(),
            Some(FailureKind::TransientNetwork)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failures_not_retried() {
        let mock = Arc::new(MockRemote::new());
        let session = logged_in(&mock).await;

        for err in [
            SyncError::not_found("x"),
            SyncError::rejected("x"),
            SyncError::local_io("x"),
        ] {
            let calls = AtomicU32::new(0);
            let expected = err.kind();
            let result: Result<(), _> = fast_policy(5)
                .run(&session, &CancellationToken::new(), "test", |_ctx| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let err = err.clone();
                    async move { Err(err) }
                })
                .await;
            assert_eq!(result.unwrap_err().kind(), expected);
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn auth_expiry_relogs_once() {
        let mock = Arc::new(MockRemote::new());
        let session = logged_in(&mock).await;
        let seen = std::sync::Mutex::new(Vec::new());

        let result = fast_policy(5)
            .run(&session, &CancellationToken::new(), "test", |ctx| {
                let first = {
                    let mut seen = seen.lock().unwrap();
                    seen.push(ctx.as_str().to_string());
                    seen.len() == 1
                };
                async move {
                    if first {
                        Err(SyncError::auth_expired("401"))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(mock.login_count(), 2);
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 2);
        assert_ne!(seen[0], seen[1], "second try uses the fresh context");
    }

    #[tokio::test]
    async fn second_auth_expiry_surfaces() {
        let mock = Arc::new(MockRemote::new());
        let session = logged_in(&mock).await;
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = fast_policy(5)
            .run(&session, &CancellationToken::new(), "test", |_ctx| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SyncError::auth_expired("401")) }
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), Some(FailureKind::AuthExpired));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(mock.login_count(), 2);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let mock = Arc::new(MockRemote::new());
        let session = logged_in(&mock).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), _> = fast_policy(5)
            .run(&session, &cancel, "test", |_ctx| async { Ok(()) })
            .await;
        assert_eq!(result.unwrap_err().kind(), Some(FailureKind::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_sleep_is_cancellable() {
        let mock = Arc::new(MockRemote::new());
        let session = logged_in(&mock).await;
        let cancel = CancellationToken::new();
        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(3600),
            max_delay: Duration::from_secs(3600),
            ..RetryPolicy::default()
        };

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let result: Result<(), _> = policy
            .run(&session, &cancel, "test", |_ctx| async {
                Err(SyncError::transient("down"))
            })
            .await;
        assert_eq!(result.unwrap_err().kind(), Some(FailureKind::Cancelled));
    }

    #[tokio::test]
    async fn not_logged_in_is_config_error() {
        let mock = Arc::new(MockRemote::new());
        let session = mock.session();
        let result: Result<(), _> = fast_policy(5)
            .run(&session, &CancellationToken::new(), "test", |_ctx| async { Ok(()) })
            .await;
        assert!(result.unwrap_err().is_config());
    }
}
