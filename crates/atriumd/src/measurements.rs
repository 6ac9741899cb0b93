//! Side-effect sink for canonical measurement history.
//!
//! Chart storage belongs to the surrounding product; the coordinator only
//! hands each normalized signal to a sink and moves on. The trait exists so
//! deployments can plug in a real time-series writer.

use async_trait::async_trait;
use tracing::debug;

/// Receives one canonical signal per ingested event that carried it.
#[async_trait]
pub trait MeasurementSink: Send + Sync {
    async fn record(
        &self,
        home_id: &str,
        device_identifier: &str,
        kind: &str,
        value: f64,
        timestamp: i64,
    );
}

/// Default sink: emits measurements to the log stream only.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl MeasurementSink for LogSink {
    async fn record(
        &self,
        home_id: &str,
        device_identifier: &str,
        kind: &str,
        value: f64,
        timestamp: i64,
    ) {
        debug!(home_id, device_identifier, kind, value, timestamp, "measurement");
    }
}
