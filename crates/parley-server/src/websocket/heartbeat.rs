//! Liveness deadline for a single connection.
//!
//! The writer pings the peer every heartbeat interval; any inbound frame
//! (a pong included) moves the connection's last-activity mark forward.
//! [`until_unresponsive`] resolves once that mark is older than the timeout.

use std::time::Duration;

use tokio::time::{self, Instant};

use super::connection::ConnectionHandle;

/// Resolve when `connection` has been silent for `timeout`.
///
/// Sleeps until the current deadline, then re-checks: activity recorded in
/// the meantime pushes the deadline out and the wait starts over.
pub async fn until_unresponsive(connection: &ConnectionHandle, timeout: Duration) {
    loop {
        let deadline = connection.last_activity() + timeout;
        if deadline <= Instant::now() {
            return;
        }
        time::sleep_until(deadline).await;
    }
}
