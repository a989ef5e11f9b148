// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the hostedcp operator and infrastructure tooling.
//!
//! Every metric is prefixed with `hostedcp_`:
//!
//! - `reconciles_total` / `reconcile_duration_seconds` per controller
//! - `object_writes_total` for objects a controller created or patched
//! - `reconcile_errors_total` per controller and error category
//! - `instance_type_fetches_total` for EC2 catalog refreshes
//! - `infra_step_duration_seconds` for PowerVS create and destroy steps
//!
//! ```rust,no_run
//! use hostedcp::metrics::{record_reconcile, ReconcileOutcome};
//!
//! record_reconcile("NodePool", ReconcileOutcome::Success, std::time::Duration::from_secs(1));
//! ```

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;
use std::time::Duration;

const METRICS_NAMESPACE: &str = "hostedcp";

/// Registry served on `/metrics`.
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

fn register_counter(name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let counter = CounterVec::new(Opts::new(format!("{METRICS_NAMESPACE}_{name}"), help), labels)
        .expect("metric options are valid");
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .expect("metric is registered once");
    counter
}

fn register_histogram(name: &str, help: &str, labels: &[&str], buckets: Vec<f64>) -> HistogramVec {
    let opts = HistogramOpts::new(format!("{METRICS_NAMESPACE}_{name}"), help).buckets(buckets);
    let histogram = HistogramVec::new(opts, labels).expect("metric options are valid");
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .expect("metric is registered once");
    histogram
}

// ============================================================================
// Controllers
// ============================================================================

/// Labels: `controller`, `outcome` (`success`, `requeue`, `error`)
pub static RECONCILES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    register_counter(
        "reconciles_total",
        "Reconciles by controller and outcome",
        &["controller", "outcome"],
    )
});

/// Labels: `controller`
pub static RECONCILE_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram(
        "reconcile_duration_seconds",
        "Reconcile duration by controller",
        &["controller"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0],
    )
});

/// Labels: `kind` of the written object, `action` (`created`, `patched`)
pub static OBJECT_WRITES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    register_counter(
        "object_writes_total",
        "Objects created or patched by the controllers",
        &["kind", "action"],
    )
});

/// Labels: `controller`, `category` (see `ReconcileError::category`)
pub static RECONCILE_ERRORS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    register_counter(
        "reconcile_errors_total",
        "Failed reconciles by controller and error category",
        &["controller", "category"],
    )
});

/// Labels: `region`, `outcome` (`success`, `error`)
pub static INSTANCE_TYPE_FETCHES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    register_counter(
        "instance_type_fetches_total",
        "EC2 instance type catalog refreshes by region",
        &["region", "outcome"],
    )
});

// ============================================================================
// PowerVS infrastructure
// ============================================================================

/// Labels: `phase` (`create`, `destroy`), `step`, `outcome` (`success`, `error`)
pub static INFRA_STEP_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram(
        "infra_step_duration_seconds",
        "Duration of infrastructure create and destroy steps",
        &["phase", "step", "outcome"],
        vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0],
    )
});

/// How a reconcile ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Success,
    /// Transient failure retried with backoff
    Requeue,
    Error,
}

impl ReconcileOutcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Requeue => "requeue",
            Self::Error => "error",
        }
    }
}

/// What a controller did to an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectWrite {
    Created,
    Patched,
}

/// Which infrastructure command ran a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfraPhase {
    Create,
    Destroy,
}

fn outcome_label(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "error"
    }
}

/// Count a finished reconcile and observe its duration.
pub fn record_reconcile(controller: &str, outcome: ReconcileOutcome, duration: Duration) {
    RECONCILES_TOTAL
        .with_label_values(&[controller, outcome.as_str()])
        .inc();
    RECONCILE_DURATION_SECONDS
        .with_label_values(&[controller])
        .observe(duration.as_secs_f64());
}

/// Count a failed reconcile by error category.
pub fn record_reconcile_error(controller: &str, category: &str) {
    RECONCILE_ERRORS_TOTAL
        .with_label_values(&[controller, category])
        .inc();
}

pub fn record_object_write(kind: &str, write: ObjectWrite) {
    let action = match write {
        ObjectWrite::Created => "created",
        ObjectWrite::Patched => "patched",
    };
    OBJECT_WRITES_TOTAL.with_label_values(&[kind, action]).inc();
}

pub fn record_instance_type_fetch(region: &str, success: bool) {
    INSTANCE_TYPE_FETCHES_TOTAL
        .with_label_values(&[region, outcome_label(success)])
        .inc();
}

/// Observe one infrastructure step.
pub fn record_infra_step(phase: InfraPhase, step: &str, duration: Duration, success: bool) {
    let phase = match phase {
        InfraPhase::Create => "create",
        InfraPhase::Destroy => "destroy",
    };
    INFRA_STEP_DURATION_SECONDS
        .with_label_values(&[phase, step, outcome_label(success)])
        .observe(duration.as_secs_f64());
}

/// Gather and encode all metrics in Prometheus text format
///
/// # Returns
/// Prometheus-formatted metrics as a String
///
/// # Errors
/// Returns error if encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}

/// Router serving `/metrics` in Prometheus text format and `/healthz`.
pub fn metrics_router() -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(|| async { "ok" }))
}

async fn metrics_handler() -> Response {
    match gather_metrics() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_reconcile() {
        record_reconcile("TestController", ReconcileOutcome::Requeue, Duration::from_millis(500));

        let counter = RECONCILES_TOTAL.with_label_values(&["TestController", "requeue"]);
        assert!(counter.get() > 0.0);
        let histogram = RECONCILE_DURATION_SECONDS.with_label_values(&["TestController"]);
        assert!(histogram.get_sample_count() > 0);
    }

    #[test]
    fn test_record_object_write() {
        record_object_write("TestKind", ObjectWrite::Created);
        record_object_write("TestKind", ObjectWrite::Patched);
        record_object_write("TestKind", ObjectWrite::Patched);

        assert!((OBJECT_WRITES_TOTAL.with_label_values(&["TestKind", "created"]).get() - 1.0).abs() < f64::EPSILON);
        assert!((OBJECT_WRITES_TOTAL.with_label_values(&["TestKind", "patched"]).get() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_record_infra_step() {
        record_infra_step(InfraPhase::Create, "vpc-test", Duration::from_secs(3), true);
        record_infra_step(InfraPhase::Destroy, "vpc-test", Duration::from_secs(1), false);

        let ok = INFRA_STEP_DURATION_SECONDS.with_label_values(&["create", "vpc-test", "success"]);
        assert_eq!(ok.get_sample_count(), 1);
        assert!((ok.get_sample_sum() - 3.0).abs() < f64::EPSILON);

        let failed = INFRA_STEP_DURATION_SECONDS.with_label_values(&["destroy", "vpc-test", "error"]);
        assert_eq!(failed.get_sample_count(), 1);
    }

    #[test]
    fn test_gather_metrics() {
        record_reconcile("GatherTest", ReconcileOutcome::Success, Duration::from_millis(100));
        record_instance_type_fetch("gather-test-1", true);

        let text = gather_metrics().unwrap();
        assert!(text.contains("hostedcp_reconciles_total"));
        assert!(text.contains("hostedcp_instance_type_fetches_total"));
    }
}
