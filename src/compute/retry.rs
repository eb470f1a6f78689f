//! Transient-failure retry policy for compute API calls.
//!
//! Wraps a call in up to three attempts. Between attempts it sleeps
//! `(random 0-1000ms + 1s) * attempt * multiplier`; GOAWAY and
//! ENHANCE_YOUR_CALM responses double the multiplier, since the server is
//! explicitly asking for more headroom.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::debug;

use super::{ApiError, ApiResult};

const MAX_ATTEMPTS: u32 = 3;

/// Whether the error warrants another attempt.
///
/// Retryable: connection resets and truncated streams; GOAWAY and
/// ENHANCE_YOUR_CALM control frames (these also double `multiplier`);
/// HTTP 5xx and 429; HTTP 403 carrying `rateLimitExceeded` (quota on rate,
/// not on resources); oauth token refresh failures.
pub fn should_retry(err: &ApiError, multiplier: &mut u32) -> bool {
    match err {
        ApiError::Transport(msg)
            if msg.contains("connection reset by peer") || msg.contains("unexpected EOF") =>
        {
            true
        }
        ApiError::Transport(msg)
            if msg.contains("GOAWAY") || msg.contains("ENHANCE_YOUR_CALM") =>
        {
            *multiplier *= 2;
            true
        }
        ApiError::Http { status, .. } if (500..=599).contains(status) => true,
        ApiError::Http { status: 429, .. } => true,
        ApiError::Http {
            status: 403,
            message,
        } if message.contains("rateLimitExceeded") => true,
        ApiError::TokenRefresh(_) => true,
        _ => false,
    }
}

fn backoff(attempt: u32, multiplier: u32) -> Duration {
    let jitter = rand::thread_rng().gen_range(0..1000);
    (Duration::from_millis(jitter) + Duration::from_secs(1)) * attempt * multiplier
}

/// Invoke `f`, retrying transient failures up to three attempts total.
pub async fn call_with_retry<T, F, Fut>(mut f: F) -> ApiResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<T>>,
{
    let mut multiplier = 1u32;
    let mut attempt = 1u32;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(err) => {
                if attempt >= MAX_ATTEMPTS || !should_retry(&err, &mut multiplier) {
                    return Err(err);
                }
                let wait = backoff(attempt, multiplier);
                debug!(attempt, wait_ms = wait.as_millis() as u64, error = %err, "retrying API call");
                sleep(wait).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn server_error() -> ApiError {
        ApiError::Http {
            status: 503,
            message: "backend unavailable".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound_is_three_attempts() {
        let calls = AtomicU32::new(0);
        let res: ApiResult<()> = call_with_retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(server_error()) }
        })
        .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retry_on_client_error() {
        let calls = AtomicU32::new(0);
        let res: ApiResult<()> = call_with_retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ApiError::Http {
                    status: 404,
                    message: "not found".to_string(),
                })
            }
        })
        .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let res = call_with_retry(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(ApiError::Transport("connection reset by peer".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(res.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_rate_limit_classification() {
        let mut m = 1;
        assert!(should_retry(
            &ApiError::Http {
                status: 403,
                message: "quota: rateLimitExceeded".to_string()
            },
            &mut m
        ));
        assert!(!should_retry(
            &ApiError::Http {
                status: 403,
                message: "forbidden".to_string()
            },
            &mut m
        ));
        assert!(should_retry(
            &ApiError::Http {
                status: 429,
                message: "too many requests".to_string()
            },
            &mut m
        ));
        assert_eq!(m, 1);
    }

    #[test]
    fn test_goaway_doubles_multiplier() {
        let mut m = 1;
        assert!(should_retry(
            &ApiError::Transport("server sent GOAWAY".to_string()),
            &mut m
        ));
        assert_eq!(m, 2);
        assert!(should_retry(
            &ApiError::Transport("ENHANCE_YOUR_CALM".to_string()),
            &mut m
        ));
        assert_eq!(m, 4);
    }

    #[test]
    fn test_token_refresh_retries() {
        let mut m = 1;
        assert!(should_retry(
            &ApiError::TokenRefresh("metadata server unreachable".to_string()),
            &mut m
        ));
    }
}
