//! Bounded polling for conditions driven by the remote page.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Poll `probe` every `interval` until it returns `true` or `timeout`
/// elapses. Returns whether the condition was observed.
///
/// The probe runs at least once even with a zero timeout, so a
/// condition that already holds is never reported as timed out.
pub(crate) async fn poll_until<F, Fut>(timeout: Duration, interval: Duration, mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if probe().await {
            return true;
        }
        if Instant::now() + interval > deadline {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}
