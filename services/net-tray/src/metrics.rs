//! Prometheus metrics exposition
//!
//! The reconciler emits through the `metrics` facade:
//!
//! - `nettray_refresh_total` (counter): labels `kind`, `outcome`
//! - `nettray_refresh_skipped_total` (counter): label `kind`
//! - `nettray_refresh_duration_seconds` (histogram): label `kind`
//! - `nettray_login_attempts_total` (counter): labels `trigger`, `outcome`
//! - `nettray_status` (gauge): numeric link status
//!
//! This module installs the recorder and adds the console command counter.

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Probe latency buckets, 10ms to the longest sensible request timeout.
const REFRESH_BUCKETS: &[f64] = &[0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("nettray_refresh_duration_seconds".to_string()),
            REFRESH_BUCKETS,
        )
        .expect("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a console command by name.
pub fn record_command(name: &'static str) {
    metrics::counter!("nettray_console_commands_total", "command" => name).increment(1);
}
