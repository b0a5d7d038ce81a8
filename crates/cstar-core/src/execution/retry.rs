//! Retry with exponential backoff for transient scheduler failures.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::domain::error::Result;

/// Retries after the initial attempt.
const MAX_RETRIES: u32 = 3;

/// Run `op` up to four times (1 s, 2 s, 4 s between attempts).
///
/// The final error is returned unchanged; callers wrap it in the scheduler
/// error they want to surface.
pub async fn retry_with_backoff<T, F, Fut>(label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = Duration::from_secs(1);
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < MAX_RETRIES => {
                attempt += 1;
                warn!(label, attempt, error = %err, "transient failure, backing off");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::CstarError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff("poll", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CstarError::Network {
                        url: "scheduler".into(),
                        message: "timeout".into(),
                    })
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_three_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff("poll", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(CstarError::Network {
                    url: "scheduler".into(),
                    message: "down".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
