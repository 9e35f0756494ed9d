//! Prometheus metrics for the invoice lifecycle engine.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Engine operation counter by operation and outcome.
pub static ENGINE_OPS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoicing_engine_ops_total",
        "Total number of engine operations",
        &["operation", "status"]
    )
    .expect("Failed to register engine_ops_total")
});

/// Engine operation duration histogram.
pub static ENGINE_OP_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "invoicing_engine_op_duration_seconds",
        "Engine operation duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register engine_op_duration")
});

/// Stock movement counter by direction.
pub static STOCK_MOVEMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoicing_stock_movements_total",
        "Total number of stock movements by direction",
        &["direction"]
    )
    .expect("Failed to register stock_movements_total")
});

/// Payment amount counter by method.
pub static PAYMENT_AMOUNT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoicing_payment_amount_total",
        "Total payment amount by method",
        &["method"]
    )
    .expect("Failed to register payment_amount_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoicing_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&ENGINE_OPS_TOTAL);
    Lazy::force(&ENGINE_OP_DURATION);
    Lazy::force(&STOCK_MOVEMENTS_TOTAL);
    Lazy::force(&PAYMENT_AMOUNT_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
