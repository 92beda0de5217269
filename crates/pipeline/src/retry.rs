//! Async retry wrapper around transient API calls

use std::future::Future;

use clinsynth_core::{PipelineError, RetryPolicy};

/// Call `call` until it succeeds, the error is not transient, or the
/// policy's attempts are used up. The last error is returned.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    call: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    retry_when(policy, operation, PipelineError::is_transient, call).await
}

/// Like [`with_retry`], with the caller deciding which errors are worth
/// another attempt.
pub async fn retry_when<T, F, Fut, P>(
    policy: &RetryPolicy,
    operation: &str,
    should_retry: P,
    mut call: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
    P: Fn(&PipelineError) -> bool,
{
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if should_retry(&err) && policy.allows_another(attempts) => {
                let delay = policy.delay(attempts - 1, &mut rand::thread_rng());
                tracing::warn!(
                    operation,
                    attempt = attempts,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::ZERO, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let value = with_retry(&fast(5), "test", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(PipelineError::Transport("flaky".into()))
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = with_retry(&fast(3), "test", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(PipelineError::Transport("down".into()))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, PipelineError::Transport(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = with_retry(&fast(5), "test", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(PipelineError::Validation("bad".into()))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, PipelineError::Validation(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn custom_predicate_retries_extraction_failures() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let value = retry_when(
            &fast(4),
            "test",
            |err| matches!(err, PipelineError::Extraction { .. }),
            || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(PipelineError::Extraction {
                        correlation_id: "complaints".into(),
                        reason: "no JSON array found".into(),
                    })
                } else {
                    Ok("ok")
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(value, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
