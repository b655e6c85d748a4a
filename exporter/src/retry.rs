//! Retry utility with a fixed delay

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Retry an async operation until it succeeds, sleeping `delay` between attempts.
///
/// The delay never grows: a replacement pod is expected to be scheduled long
/// before backing off would matter. Every failure is handed to `on_error`
/// together with the attempt number. Returns `None` once `shutdown` is
/// cancelled while waiting for the next attempt.
pub async fn retry_until_ok<F, Fut, T, E, R>(
    delay: Duration,
    shutdown: &CancellationToken,
    mut f: F,
    mut on_error: R,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    R: FnMut(u64, &E),
{
    let mut attempt: u64 = 0;

    loop {
        if shutdown.is_cancelled() {
            return None;
        }
        attempt += 1;
        match f().await {
            Ok(val) => return Some(val),
            Err(e) => {
                on_error(attempt, &e);
                tokio::select! {
                    _ = shutdown.cancelled() => return None,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
