//! `/health` endpoint payload.

use std::time::Instant;

use serde::Serialize;

/// Whether the relay is accepting new connections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Serving normally.
    Ok,
    /// Shutdown has started; existing connections are being closed.
    Draining,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` or `"draining"`.
    pub status: HealthStatus,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Connections currently joined to a room.
    pub connections: usize,
    /// Rooms with at least one member.
    pub rooms: usize,
}

/// Snapshot the relay's live counters.
pub fn health_check(
    start_time: Instant,
    connections: usize,
    rooms: usize,
    draining: bool,
) -> HealthResponse {
    HealthResponse {
        status: if draining {
            HealthStatus::Draining
        } else {
            HealthStatus::Ok
        },
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        rooms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fresh_server_is_ok() {
        let resp = health_check(Instant::now(), 0, 0, false);
        assert_eq!(resp.status, HealthStatus::Ok);
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn uptime_counts_from_start() {
        let start = Instant::now().checked_sub(Duration::from_secs(60)).unwrap();
        assert!(health_check(start, 0, 0, false).uptime_secs >= 59);
    }

    #[test]
    fn serializes_counts_and_lowercase_status() {
        let parsed = serde_json::to_value(health_check(Instant::now(), 4, 2, true)).unwrap();
        assert_eq!(parsed["status"], "draining");
        assert_eq!(parsed["connections"], 4);
        assert_eq!(parsed["rooms"], 2);
        assert!(parsed["uptime_secs"].is_number());
    }
}
