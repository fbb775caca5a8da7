//! Instruments recorded by the scanner and the THORChain client.
//!
//! Every failure path increments one of the labelled error counters before the error is returned, so a node can be
//! monitored without parsing its logs.

use std::time::Duration;

use opentelemetry::{
    KeyValue,
    metrics::{Counter, Gauge, Histogram, Meter},
};

const DURATION_BOUNDARIES: [f64; 14] = [
    0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

#[derive(Debug, Clone)]
pub struct Metrics {
    block_scanner_error: Counter<u64>,
    thorchain_client_error: Counter<u64>,
    block_discovery_duration: Histogram<f64>,
    sign_to_thorchain_duration: Histogram<f64>,
    current_position: Gauge<u64>,
    total_block_scanned: Counter<u64>,
    total_retry_blocks: Counter<u64>,
    block_observed: Counter<u64>,
}

impl Metrics {
    pub fn new(meter: &Meter) -> Self {
        Metrics {
            block_scanner_error: meter
                .u64_counter("block_scanner_error")
                .with_description("Errors encountered by the block scanner, by failure mode")
                .build(),
            thorchain_client_error: meter
                .u64_counter("thorchain_client_error")
                .with_description("Errors encountered talking to THORChain, by failure mode")
                .build(),
            block_discovery_duration: meter
                .f64_histogram("block_discovery_duration")
                .with_unit("s")
                .with_boundaries(DURATION_BOUNDARIES.to_vec())
                .build(),
            sign_to_thorchain_duration: meter
                .f64_histogram("sign_to_thorchain_duration")
                .with_unit("s")
                .with_boundaries(DURATION_BOUNDARIES.to_vec())
                .build(),
            current_position: meter
                .u64_gauge("block_scanner_current_position")
                .build(),
            total_block_scanned: meter.u64_counter("total_block_scanned").build(),
            total_retry_blocks: meter.u64_counter("total_retry_blocks").build(),
            block_observed: meter.u64_counter("block_observed").build(),
        }
    }

    pub fn scanner_error(&self, error: &'static str, detail: impl Into<String>) {
        self.block_scanner_error.add(
            1,
            &[
                KeyValue::new("error", error),
                KeyValue::new("detail", detail.into()),
            ],
        );
    }

    pub fn thorchain_error(&self, error: &'static str, detail: impl Into<String>) {
        self.thorchain_client_error.add(
            1,
            &[
                KeyValue::new("error", error),
                KeyValue::new("detail", detail.into()),
            ],
        );
    }

    pub fn block_discovery_duration(&self, elapsed: Duration) {
        self.block_discovery_duration
            .record(elapsed.as_secs_f64(), &[]);
    }

    pub fn sign_duration(&self, elapsed: Duration) {
        self.sign_to_thorchain_duration
            .record(elapsed.as_secs_f64(), &[]);
    }

    pub fn current_position(&self, height: u64) {
        self.current_position.record(height, &[]);
    }

    pub fn block_scanned(&self) {
        self.total_block_scanned.add(1, &[]);
    }

    pub fn block_retried(&self) {
        self.total_retry_blocks.add(1, &[]);
    }

    pub fn block_observed(&self, success: bool) {
        self.block_observed
            .add(1, &[KeyValue::new("success", success)]);
    }
}

impl Default for Metrics {
    /// Instruments from the globally installed meter provider. Until one is installed these record nothing.
    fn default() -> Self {
        Metrics::new(&opentelemetry::global::meter("bifrost"))
    }
}
