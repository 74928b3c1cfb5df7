//! The single bounded readiness wait each tick performs

use std::future::Future;
use std::time::Duration;

/// Drive `ready` until it resolves or `limit` elapses.
///
/// The future is polled once before the deadline is checked, so a zero
/// limit still observes sockets that are already ready.
pub(crate) async fn wait_for<F: Future>(limit: Duration, ready: F) -> Option<F::Output> {
    tokio::time::timeout(limit, ready).await.ok()
}
