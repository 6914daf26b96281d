//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Fails if another recorder is already installed in this process.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Handshakes refused total (counter, labels: reason).
pub const WS_REJECTIONS_TOTAL: &str = "ws_rejections_total";
/// Connection lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Signaling frames accepted for fan-out (counter).
pub const SIGNAL_FRAMES_TOTAL: &str = "signal_frames_total";
/// Frames dropped as malformed (counter).
pub const SIGNAL_PROTOCOL_ERRORS_TOTAL: &str = "signal_protocol_errors_total";
/// Frames enqueued to recipients (counter).
pub const SIGNAL_DELIVERIES_TOTAL: &str = "signal_deliveries_total";
/// Queued frames discarded under `drop_oldest` (counter).
pub const SIGNAL_QUEUE_DROPS_TOTAL: &str = "signal_queue_drops_total";
/// Recipients evicted for a full queue (counter).
pub const SIGNAL_SLOW_CONSUMERS_TOTAL: &str = "signal_slow_consumers_total";
/// Rooms with at least one member (gauge).
pub const ROOMS_ACTIVE: &str = "rooms_active";
