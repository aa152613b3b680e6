//! Prometheus recorder and metric names shared across crates.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::TelemetryError;

/// Install the global Prometheus recorder. Only the first call in a process succeeds.
pub fn install_recorder() -> Result<PrometheusHandle, TelemetryError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| TelemetryError::Recorder(e.to_string()))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Lock acquisitions (counter, labels: outcome = acquired|timeout|error).
pub const LOCK_ACQUIRE_TOTAL: &str = "lock_acquire_total";
/// Time spent waiting for a lock (histogram).
pub const LOCK_WAIT_SECONDS: &str = "lock_wait_seconds";
/// Conditional-write attempts that found the lock held (counter).
pub const LOCK_CONTENDED_TOTAL: &str = "lock_contended_total";
/// Session saves (counter).
pub const SESSION_SAVES_TOTAL: &str = "session_saves_total";
/// Sessions created (counter).
pub const SESSIONS_CREATED_TOTAL: &str = "sessions_created_total";
/// Messages delivered by broadcast (counter).
pub const BROADCAST_DELIVERED_TOTAL: &str = "broadcast_delivered_total";
/// Watchers pruned after Gone (counter).
pub const BROADCAST_PRUNED_TOTAL: &str = "broadcast_pruned_total";
/// Failed deliveries (counter, labels: error_kind).
pub const BROADCAST_FAILED_TOTAL: &str = "broadcast_failed_total";
/// Broadcast round duration (histogram).
pub const BROADCAST_DURATION_SECONDS: &str = "broadcast_duration_seconds";
/// Operations handled (counter, labels: action, outcome).
pub const OPERATIONS_TOTAL: &str = "operations_total";
/// Operation duration (histogram, labels: action).
pub const OPERATION_DURATION_SECONDS: &str = "operation_duration_seconds";
/// WebSocket connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Rows removed by the expiry sweeper (counter, labels: table).
pub const SWEEPER_PURGED_TOTAL: &str = "sweeper_purged_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = render(&handle);
        assert!(output.is_empty() || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            LOCK_ACQUIRE_TOTAL,
            LOCK_WAIT_SECONDS,
            LOCK_CONTENDED_TOTAL,
            SESSION_SAVES_TOTAL,
            SESSIONS_CREATED_TOTAL,
            BROADCAST_DELIVERED_TOTAL,
            BROADCAST_PRUNED_TOTAL,
            BROADCAST_FAILED_TOTAL,
            BROADCAST_DURATION_SECONDS,
            OPERATIONS_TOTAL,
            OPERATION_DURATION_SECONDS,
            WS_CONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            SWEEPER_PURGED_TOTAL,
        ];
        for name in names {
            assert!(name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }
}
