//! Write-only benchmark sink
//!
//! Message latencies flow out of the supervisor into a sink the core never
//! reads back. The CSV/resource-counter recorder of the fleet experiments
//! lives behind this trait, outside the crate.

use std::time::Duration;

use tracing::debug;

/// Write-only sink for per-message latency records
pub trait MetricsSink: Send + Sync {
    fn record(&self, identity: &str, message: &str, latency: Duration);
}

/// Sink that emits records as debug-level trace events
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn record(&self, identity: &str, message: &str, latency: Duration) {
        debug!(
            charge_point = identity,
            message, latency_ms = latency.as_millis() as u64, "ocpp call completed"
        );
    }
}

/// Sink that drops every record
pub struct NullSink;

impl MetricsSink for NullSink {
    fn record(&self, _identity: &str, _message: &str, _latency: Duration) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink {
        records: Mutex<Vec<(String, String)>>,
    }

    impl MetricsSink for RecordingSink {
        fn record(&self, identity: &str, message: &str, _latency: Duration) {
            self.records
                .lock()
                .unwrap()
                .push((identity.to_string(), message.to_string()));
        }
    }

    #[test]
    fn test_sink_receives_records() {
        let sink = RecordingSink {
            records: Mutex::new(Vec::new()),
        };
        sink.record("CP001", "Heartbeat", Duration::from_millis(12));
        sink.record("CP001", "StatusNotification", Duration::from_millis(3));

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].1, "Heartbeat");
    }
}
