//! Long-poll helper for asynchronous compute operations.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use super::{ApiError, ApiResult, Operation};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Poll `get` until the named operation reaches a terminal status.
///
/// `PENDING` and `RUNNING` sleep one second and poll again. `DONE` with a
/// non-empty error list fails with a diagnostic containing a `Code:` and
/// `Message:` line per entry. Any other status is an error.
pub async fn wait<F, Fut>(name: &str, mut get: F) -> ApiResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<Operation>>,
{
    loop {
        let op = get().await?;
        match op.status.as_str() {
            "PENDING" | "RUNNING" => sleep(POLL_INTERVAL).await,
            "DONE" => {
                if let Some(op_err) = &op.error {
                    if !op_err.errors.is_empty() {
                        let mut diag = String::new();
                        for e in &op_err.errors {
                            diag.push_str(&format!("\nCode: {}\nMessage: {}", e.code, e.message));
                        }
                        return Err(ApiError::Operation(format!(
                            "operation {:?} failed:{}",
                            name, diag
                        )));
                    }
                }
                return Ok(());
            }
            other => {
                return Err(ApiError::Operation(format!(
                    "unknown operation status {:?} for operation {:?}",
                    other, name
                )))
            }
        }
    }
}
