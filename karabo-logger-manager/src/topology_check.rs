//! The periodic end-to-end sanity check: for every `RUNNING` logger,
//! compare what it claims to have last logged against what the device
//! itself reports, and force a stop+start when the two disagree by more
//! than the configured tolerance. See [`check_one_server`].

use std::sync::Arc;

use tracing::warn;

use karabo_data::{Timestamp, Value};

use crate::manager::{logger_instance_id, most_recent_timestamp, parse_iso8601_seconds, LoggerManager};

/// Everything the last sanity check found, aggregated across every
/// server that was checked. Published as the `topologyCheck.lastCheckResult`
/// read-only property and logged at `info`.
#[derive(Debug, Clone, Default)]
pub struct CheckSummary {
    pub offline_loggers: usize,
    pub logger_query_failures: usize,
    pub empty_timestamp_devices: Vec<String>,
    pub forced_restarts: Vec<String>,
    pub detail_requests: usize,
    pub device_query_failures: usize,
    pub stopped_devices: Vec<String>,
}

impl CheckSummary {
    pub fn render_text(&self) -> String {
        format!(
            "offline={} logger_query_failures={} empty_timestamp=[{}] forced_restarts=[{}] detail_requests={} device_query_failures={} stopped=[{}]",
            self.offline_loggers,
            self.logger_query_failures,
            self.empty_timestamp_devices.join(","),
            self.forced_restarts.join(","),
            self.detail_requests,
            self.device_query_failures,
            self.stopped_devices.join(","),
        )
    }
}

/// Step 1-3 of the periodic check for one `RUNNING` server: request its
/// per-device last-update table plus a flush, then reconcile each row.
pub async fn check_one_server(manager: &Arc<LoggerManager>, server_id: &str, summary: &mut CheckSummary) {
    let logger_id = logger_instance_id(server_id);
    let owner = manager.owner();

    let table = owner.request(&logger_id, "slotGetLastUpdateTimes").timeout(manager.request_timeout()).request(vec![]).await;

    let (device_ids, timestamps) = match table {
        Ok(args) => {
            let ids = args.first().and_then(as_vector_string).unwrap_or_default();
            let stamps = args.get(1).and_then(as_vector_string).unwrap_or_default();
            (ids, stamps)
        }
        Err(e) => {
            warn!(server = server_id, error = %e, "failed to query logger for last-update times");
            summary.logger_query_failures += 1;
            return;
        }
    };

    if let Err(e) = owner.request(&logger_id, "slotFlush").timeout(manager.request_timeout()).request(vec![]).await {
        warn!(server = server_id, error = %e, "flush request failed");
    }

    for (device_id, ts_str) in device_ids.into_iter().zip(timestamps.into_iter()) {
        reconcile_device_row(manager, server_id, &device_id, &ts_str, summary).await;
    }
}

async fn reconcile_device_row(manager: &Arc<LoggerManager>, server_id: &str, device_id: &str, ts_str: &str, summary: &mut CheckSummary) {
    if ts_str.is_empty() {
        summary.empty_timestamp_devices.push(device_id.to_string());
        let streak = manager.mark_empty_timestamp(device_id);
        if streak >= 2 {
            manager.force_restart_device_public(server_id, device_id).await;
            summary.forced_restarts.push(device_id.to_string());
        }
        return;
    }
    manager.clear_empty_timestamp(device_id);

    let Some(logger_ts) = parse_iso8601_seconds(ts_str) else {
        // Not parseable as a timestamp at all -- treat as empty rather
        // than comparing against a bogus value.
        summary.empty_timestamp_devices.push(device_id.to_string());
        return;
    };

    let now = Timestamp::now();
    if now.elapsed_since(&logger_ts) <= manager.tolerance_logged().as_secs_f64() {
        return;
    }

    summary.detail_requests += 1;
    let owner = manager.owner();
    let config_reply = owner.request(device_id, "slotGetConfiguration").timeout(manager.request_timeout()).request(vec![]).await;

    match config_reply {
        Ok(args) => {
            let Some(device_ts) = args.first().and_then(Value::as_container).and_then(most_recent_timestamp) else {
                return;
            };
            let lag = device_ts.elapsed_since(&logger_ts);
            if lag > manager.lag_tolerance().as_secs_f64() {
                manager.force_restart_device_public(server_id, device_id).await;
                summary.forced_restarts.push(device_id.to_string());
            }
        }
        Err(e) => {
            summary.device_query_failures += 1;
            if !manager.is_device_recorded_as_logged(server_id, device_id) {
                warn!(server = server_id, device = device_id, error = %e, "device query failed and bookkeeping disagrees, stopping logging");
                manager.tag_device_discontinued_public(server_id, device_id).await;
                summary.stopped_devices.push(device_id.to_string());
            } else {
                warn!(server = server_id, device = device_id, error = %e, "device query failed");
            }
        }
    }
}

fn as_vector_string(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::VectorString(v) => Some(v.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_render_text_names_affected_devices() {
        let mut summary = CheckSummary::default();
        summary.forced_restarts.push("d1".to_string());
        summary.offline_loggers = 2;
        let text = summary.render_text();
        assert!(text.contains("d1"));
        assert!(text.contains("offline=2"));
    }
}
