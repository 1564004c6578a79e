//! The one-shot notifier used by WAIT and blocking XREAD: a condition event
//! that either fires (producer satisfies the precondition) or is abandoned
//! on timeout.

use std::future::Future;
use std::time::Duration;

/// Waits on an already-created `Notify::notified()` future until woken or
/// `timeout` elapses (`None` means wait indefinitely). The future must be
/// created *before* the caller checks its condition — that is what lets a
/// concurrent producer's `notify_waiters()` land even if it fires between
/// the check and the await, which is the whole point of this primitive.
/// Returns `true` if woken, `false` on timeout; callers re-check their
/// actual condition afterwards rather than trusting the boolean alone.
pub async fn wait_or_timeout<F: Future<Output = ()>>(notified: F, timeout: Option<Duration>) -> bool {
    match timeout {
        None => {
            notified.await;
            true
        }
        Some(d) => tokio::time::timeout(d, notified).await.is_ok(),
    }
}
