//! Shutdown fan-out.
//!
//! Every connection holds a child of the coordinator's token, so one
//! `shutdown()` reaches all of them while a single connection can still be
//! cancelled (evicted) on its own.

use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the server-wide cancellation token.
#[derive(Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a coordinator that has not been triggered.
    pub fn new() -> Self {
        Self::default()
    }

    /// The server-wide token (for the accept loop).
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// A per-connection token: cancelled by [`shutdown`](Self::shutdown),
    /// and cancellable on its own without touching siblings.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Trigger shutdown. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Trigger shutdown and wait up to `timeout` (default 10s) for `tasks`.
    ///
    /// Tasks still running at the deadline are aborted. Returns whether all
    /// of them finished on their own.
    pub async fn graceful_shutdown(
        &self,
        tasks: Vec<JoinHandle<()>>,
        timeout: Option<Duration>,
    ) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.shutdown();
        info!(tasks = tasks.len(), ?timeout, "shutdown started");

        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(timeout, join_all(tasks)).await.is_ok() {
            return true;
        }
        let stragglers = aborts.iter().filter(|a| !a.is_finished()).count();
        warn!(stragglers, ?timeout, "shutdown deadline passed, aborting");
        for abort in aborts {
            abort.abort();
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_untriggered_and_shutdown_is_idempotent() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(coord.token().is_cancelled());
    }

    #[test]
    fn shutdown_reaches_every_connection_token() {
        let coord = ShutdownCoordinator::new();
        let conns: Vec<_> = (0..3).map(|_| coord.child_token()).collect();
        coord.shutdown();
        assert!(conns.iter().all(CancellationToken::is_cancelled));
    }

    #[test]
    fn evicting_one_connection_spares_the_rest() {
        let coord = ShutdownCoordinator::new();
        let evicted = coord.child_token();
        let bystander = coord.child_token();
        evicted.cancel();
        assert!(!coord.is_shutting_down());
        assert!(!bystander.is_cancelled());
    }

    #[tokio::test]
    async fn cooperative_tasks_finish_in_time() {
        let coord = ShutdownCoordinator::new();
        let token = coord.child_token();
        let task = tokio::spawn(async move { token.cancelled().await });

        assert!(coord.graceful_shutdown(vec![task], None).await);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_tasks_are_aborted_at_the_deadline() {
        let coord = ShutdownCoordinator::new();
        let stuck = tokio::spawn(std::future::pending::<()>());

        let finished = coord
            .graceful_shutdown(vec![stuck], Some(Duration::from_millis(100)))
            .await;
        assert!(!finished);
        assert!(coord.is_shutting_down());
    }
}
