//! # Prometheus Metrics
//!
//! Operational metrics for the custody gateway, scraped at the `/metrics`
//! endpoint on the dedicated metrics port.
//!
//! All metrics live in a dedicated [`prometheus::Registry`] so they do not
//! collide with any default global registry consumers. Counters are fed
//! from the observer's per-cycle [`ScanReport`] rather than instrumented
//! inside the engine — the engine stays metrics-agnostic.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

use helio_engine::observer::ScanReport;

/// Holds all Prometheus metric handles for the gateway.
///
/// Clone-friendly (prometheus handles are `Arc` internally) so it can be
/// shared across request handlers and the observer loop.
#[derive(Clone)]
pub struct GatewayMetrics {
    /// Registry that owns all metrics below.
    registry: Registry,
    /// Total balance sweeps completed.
    pub scan_cycles_total: IntCounter,
    /// Total wallet observations (fetch + reconcile) across all sweeps.
    pub wallets_scanned_total: IntCounter,
    /// Total deposits detected.
    pub deposits_detected_total: IntCounter,
    /// Total lamports credited to cumulative-deposit counters.
    pub lamports_credited_total: IntCounter,
    /// Balance fetches that failed or timed out.
    pub rpc_failures_total: IntCounter,
    /// Notification deliveries that failed (retried next cycle).
    pub notification_failures_total: IntCounter,
    /// Wallets ever created.
    pub wallets_total: IntGauge,
    /// Intent requests served by the HTTP API.
    pub intent_requests_total: IntCounter,
}

impl GatewayMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("helio".into()), None)
            .expect("failed to create prometheus registry");

        fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
            let c = IntCounter::new(name, help).expect("metric creation");
            registry.register(Box::new(c.clone())).expect("metric registration");
            c
        }

        let scan_cycles_total = counter(
            &registry,
            "scan_cycles_total",
            "Total balance sweeps completed",
        );
        let wallets_scanned_total = counter(
            &registry,
            "wallets_scanned_total",
            "Total wallet observations across all sweeps",
        );
        let deposits_detected_total = counter(
            &registry,
            "deposits_detected_total",
            "Total deposits detected and credited",
        );
        let lamports_credited_total = counter(
            &registry,
            "lamports_credited_total",
            "Total lamports credited to cumulative-deposit counters",
        );
        let rpc_failures_total = counter(
            &registry,
            "rpc_failures_total",
            "Balance fetches that failed or timed out",
        );
        let notification_failures_total = counter(
            &registry,
            "notification_failures_total",
            "Notification deliveries that failed and will be retried",
        );
        let intent_requests_total = counter(
            &registry,
            "intent_requests_total",
            "Intent requests served by the HTTP API",
        );

        let wallets_total =
            IntGauge::new("wallets_total", "Custodial wallets ever created").expect("metric creation");
        registry
            .register(Box::new(wallets_total.clone()))
            .expect("metric registration");

        Self {
            registry,
            scan_cycles_total,
            wallets_scanned_total,
            deposits_detected_total,
            lamports_credited_total,
            rpc_failures_total,
            notification_failures_total,
            wallets_total,
            intent_requests_total,
        }
    }

    /// Folds one completed sweep into the counters.
    pub fn record_scan(&self, report: &ScanReport) {
        self.scan_cycles_total.inc();
        self.wallets_scanned_total.inc_by(report.wallets_scanned);
        self.deposits_detected_total.inc_by(report.deposits_detected);
        self.lamports_credited_total.inc_by(report.lamports_credited);
        self.rpc_failures_total.inc_by(report.fetch_failures);
        self.notification_failures_total.inc_by(report.notify_failures);
    }

    /// Encodes all registered metrics in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer).expect("prometheus output is valid utf-8"))
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<GatewayMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_scan_folds_report_into_counters() {
        let metrics = GatewayMetrics::new();
        let report = ScanReport {
            wallets_scanned: 5,
            deposits_detected: 2,
            lamports_credited: 7_000,
            decreases: 1,
            fetch_failures: 1,
            notify_failures: 0,
            cancelled: false,
        };

        metrics.record_scan(&report);
        metrics.record_scan(&report);

        assert_eq!(metrics.scan_cycles_total.get(), 2);
        assert_eq!(metrics.wallets_scanned_total.get(), 10);
        assert_eq!(metrics.deposits_detected_total.get(), 4);
        assert_eq!(metrics.lamports_credited_total.get(), 14_000);
        assert_eq!(metrics.rpc_failures_total.get(), 2);
    }

    #[test]
    fn encode_produces_prefixed_families() {
        let metrics = GatewayMetrics::new();
        metrics.scan_cycles_total.inc();
        let body = metrics.encode().unwrap();
        assert!(body.contains("helio_scan_cycles_total"));
        assert!(body.contains("helio_wallets_total"));
    }
}
