//! Lifecycle Metrics
//!
//! Prometheus counters and latency histograms for manager operations,
//! registered on a registry owned by the manager.

use crate::error::{Error, Result};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Instant;

/// Outcome label for successful operations
pub const OUTCOME_OK: &str = "ok";

/// Operation metrics for one manager
#[derive(Clone)]
pub struct ManagerMetrics {
    registry: Registry,
    operations: IntCounterVec,
    duration: HistogramVec,
}

impl ManagerMetrics {
    /// Create and register the metric families
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let operations = IntCounterVec::new(
            Opts::new("pool_operations_total", "Pool lifecycle operations by outcome"),
            &["operation", "outcome"],
        )
        .map_err(metrics_error)?;

        let duration = HistogramVec::new(
            HistogramOpts::new(
                "pool_operation_duration_seconds",
                "Duration of pool lifecycle operations",
            ),
            &["operation"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(operations.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(duration.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            operations,
            duration,
        })
    }

    /// Record one finished operation
    pub fn observe<T>(&self, operation: &str, started: Instant, result: &Result<T>) {
        let outcome = match result {
            Ok(_) => OUTCOME_OK.to_string(),
            Err(e) => e.kind().to_string(),
        };
        self.operations
            .with_label_values(&[operation, &outcome])
            .inc();
        self.duration
            .with_label_values(&[operation])
            .observe(started.elapsed().as_secs_f64());
    }

    /// Count of operations with the given outcome label
    pub fn count(&self, operation: &str, outcome: &str) -> u64 {
        self.operations
            .with_label_values(&[operation, outcome])
            .get()
    }

    /// Render in the Prometheus text exposition format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(format!("Metrics encoding: {}", e)))
    }
}

impl std::fmt::Debug for ManagerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerMetrics").finish_non_exhaustive()
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("Metrics error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_and_render() {
        let metrics = ManagerMetrics::new().unwrap();
        let ok: Result<()> = Ok(());
        let conflict: Result<()> = Err(Error::BalanceInProgress {
            name: "p".into(),
        });

        metrics.observe("create", Instant::now(), &ok);
        metrics.observe("create", Instant::now(), &ok);
        metrics.observe("add_disks", Instant::now(), &conflict);

        assert_eq!(metrics.count("create", OUTCOME_OK), 2);
        assert_eq!(metrics.count("add_disks", "conflict"), 1);

        let text = metrics.render().unwrap();
        assert!(text.contains("pool_operations_total"));
        assert!(text.contains("pool_operation_duration_seconds"));
    }
}
