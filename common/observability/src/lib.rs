use prometheus::{Encoder, Histogram, IntCounter, IntCounterVec, Registry, TextEncoder};

#[derive(Clone)]
pub struct StockMetrics {
    pub registry: Registry,
    pub orders_total: IntCounterVec,
    pub stock_adjustments: IntCounter,
    pub low_stock_events: IntCounter,
    pub event_emit_failures: IntCounter,
    pub commit_duration_seconds: Histogram,
    pub http_errors_total: IntCounterVec,
}

impl StockMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let orders_total = IntCounterVec::new(
            prometheus::Opts::new(
                "stock_orders_total",
                "Order create/update/delete attempts by operation and outcome"
            ),
            &["operation", "outcome"]
        ).expect("valid orders_total metric");
        let stock_adjustments = IntCounter::new(
            "stock_adjustments_total",
            "Applied manual stock adjustments",
        ).expect("valid stock_adjustments metric");
        let low_stock_events = IntCounter::new(
            "stock_low_stock_events_total",
            "Low-stock threshold crossings signalled",
        ).expect("valid low_stock_events metric");
        let event_emit_failures = IntCounter::new(
            "stock_event_emit_failures_total",
            "Low-stock events the sink refused or failed to deliver",
        ).expect("valid event_emit_failures metric");
        let commit_duration_seconds = Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "stock_ledger_commit_duration_seconds",
                "Duration of an atomic ledger commit (reserve, order write, adjustment)"
            ).buckets(vec![0.001,0.005,0.01,0.05,0.1,0.25,0.5,1.0])
        ).expect("valid commit_duration metric");
        let http_errors_total = IntCounterVec::new(
            prometheus::Opts::new(
                "http_errors_total",
                "Count of HTTP error responses emitted (status >= 400)"
            ),
            &["service", "code", "status"]
        ).expect("valid http_errors_total metric");
        let _ = registry.register(Box::new(orders_total.clone()));
        let _ = registry.register(Box::new(stock_adjustments.clone()));
        let _ = registry.register(Box::new(low_stock_events.clone()));
        let _ = registry.register(Box::new(event_emit_failures.clone()));
        let _ = registry.register(Box::new(commit_duration_seconds.clone()));
        let _ = registry.register(Box::new(http_errors_total.clone()));
        StockMetrics { registry, orders_total, stock_adjustments, low_stock_events, event_emit_failures, commit_duration_seconds, http_errors_total }
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&families, &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).to_string())
    }
}

impl Default for StockMetrics {
    fn default() -> Self { Self::new() }
}
