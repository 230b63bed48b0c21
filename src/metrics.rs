// Prometheus metrics for admission gate monitoring
//
// Process-wide counters shared by every limiter instance:
// - Tasks submitted / admitted / timed out / rejected after close (counters)
// - Tasks active and queued (gauges)
// - Time spent waiting for admission (histogram)

use lazy_static::lazy_static;
use prometheus::{Encoder, Histogram, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    pub static ref TASKS_SUBMITTED_TOTAL: IntCounter = IntCounter::new(
        "gate_tasks_submitted_total",
        "Total number of tasks submitted to a limiter"
    ).expect("Failed to create tasks submitted metric");

    pub static ref TASKS_ADMITTED_TOTAL: IntCounter = IntCounter::new(
        "gate_tasks_admitted_total",
        "Total number of tasks admitted by a quota manager"
    ).expect("Failed to create tasks admitted metric");

    pub static ref TASKS_TIMED_OUT_TOTAL: IntCounter = IntCounter::new(
        "gate_tasks_timed_out_total",
        "Total number of tasks abandoned after waiting past max delay"
    ).expect("Failed to create tasks timed out metric");

    pub static ref TASKS_REJECTED_CLOSED_TOTAL: IntCounter = IntCounter::new(
        "gate_tasks_rejected_closed_total",
        "Total number of tasks rejected because the limiter was closed"
    ).expect("Failed to create tasks rejected metric");

    pub static ref TASKS_ACTIVE: IntGauge = IntGauge::new(
        "gate_tasks_active",
        "Number of admitted tasks currently running"
    ).expect("Failed to create tasks active metric");

    pub static ref TASKS_QUEUED: IntGauge = IntGauge::new(
        "gate_tasks_queued",
        "Number of tasks waiting for admission"
    ).expect("Failed to create tasks queued metric");

    pub static ref QUEUE_WAIT_SECONDS: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new("gate_queue_wait_seconds", "Time tasks wait before admission"),
    ).expect("Failed to create queue wait metric");
}

/// Register the gate metrics with [`REGISTRY`] - call once at process startup
pub fn init() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(TASKS_SUBMITTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TASKS_ADMITTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TASKS_TIMED_OUT_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TASKS_REJECTED_CLOSED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TASKS_ACTIVE.clone()))?;
    REGISTRY.register(Box::new(TASKS_QUEUED.clone()))?;
    REGISTRY.register(Box::new(QUEUE_WAIT_SECONDS.clone()))?;
    Ok(())
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}
