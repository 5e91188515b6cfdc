//! ## keel-telemetry::metrics
//! **Prometheus exporter for pool statistics**
//!
//! Every gauge carries a `pool` label. Values are copied from
//! [`PoolReport`]s, so the recorder never touches the allocation path.

use keel_core::alloc::PoolReport;
use prometheus::{IntGaugeVec, Opts, Registry};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: Registry,
    pub allocations: IntGaugeVec,
    pub bytes_allocated: IntGaugeVec,
    pub live_count: IntGaugeVec,
    pub live_bytes: IntGaugeVec,
    pub used_bytes: IntGaugeVec,
    pub capacity_bytes: IntGaugeVec,
}

fn pool_gauge(
    registry: &Registry,
    name: &str,
    help: &str,
) -> Result<IntGaugeVec, prometheus::Error> {
    let gauge = IntGaugeVec::new(Opts::new(name, help).namespace("keel"), &["pool"])?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

fn clamp(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl MetricsRecorder {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        Ok(Self {
            allocations: pool_gauge(
                &registry,
                "pool_allocations_total",
                "Cumulative allocations per pool",
            )?,
            bytes_allocated: pool_gauge(
                &registry,
                "pool_allocated_bytes_total",
                "Cumulative rounded bytes allocated per pool",
            )?,
            live_count: pool_gauge(&registry, "pool_live_blocks", "Outstanding blocks per pool")?,
            live_bytes: pool_gauge(&registry, "pool_live_bytes", "Outstanding bytes per pool")?,
            used_bytes: pool_gauge(
                &registry,
                "pool_used_bytes",
                "Bytes in use by the pool, headers included",
            )?,
            capacity_bytes: pool_gauge(
                &registry,
                "pool_capacity_bytes",
                "Fixed pool capacity (per thread for the temporary stack)",
            )?,
            registry,
        })
    }

    /// Overwrites every gauge with the values in `reports`.
    pub fn record_reports(&self, reports: &[PoolReport]) {
        for report in reports {
            let pool = report.pool.name();
            let stats = &report.stats;
            self.allocations
                .with_label_values(&[pool])
                .set(clamp(stats.allocation_count));
            self.bytes_allocated
                .with_label_values(&[pool])
                .set(clamp(stats.bytes_allocated));
            self.live_count
                .with_label_values(&[pool])
                .set(clamp(stats.live_count));
            self.live_bytes
                .with_label_values(&[pool])
                .set(clamp(stats.live_bytes));
            self.used_bytes
                .with_label_values(&[pool])
                .set(clamp(report.used_bytes as u64));
            if let Some(capacity) = report.capacity {
                self.capacity_bytes
                    .with_label_values(&[pool])
                    .set(clamp(capacity as u64));
            }
        }
        debug!(pools = reports.len(), "pool metrics updated");
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
